//! # 秘密鍵PEMの正規化
//!
//! 環境変数経由で渡される秘密鍵は、改行が `\n` にエスケープされていたり、
//! CRLFが混入していたり、ヘッダーが重複していたりする。
//! ここでは署名に使える正規形のPEMへ変換する。
//!
//! 正規化は純粋関数で、正規化済みの鍵を再度正規化しても結果は変わらない。

use crate::CryptoError;

/// PKCS#1 ラベル（正規形の既定値）
const PKCS1_LABEL: &str = "RSA PRIVATE KEY";
/// PKCS#8 ラベル
const PKCS8_LABEL: &str = "PRIVATE KEY";
/// 本体の1行あたりの文字数
const LINE_WIDTH: usize = 64;

/// 生の秘密鍵文字列を正規形のPEMに変換する。
///
/// 1. 前後の空白を除去し、CRLFをLFに変換する
/// 2. 実際の改行を含まず `\n` エスケープを含む場合、エスケープを改行に置換する
/// 3. `-----BEGIN ... PRIVATE KEY-----` / `-----END ... PRIVATE KEY-----` を全て除去する
/// 4. 残りの空白を除いた本体を64桁で折り返し、BEGIN/ENDを1組だけ付け直す
///
/// 元のヘッダーがPKCS#8 (`PRIVATE KEY`) の場合はそのラベルを保持し、
/// それ以外は `RSA PRIVATE KEY` とする。本体が空なら `EmptyKeyMaterial`。
pub fn normalize_private_key(raw: &str) -> Result<String, CryptoError> {
    let mut key = raw.trim().replace("\r\n", "\n");
    if !key.contains('\n') && key.contains("\\n") {
        key = key.replace("\\n", "\n");
    }

    let (body, labels) = strip_markers(&key);
    let label = if labels.iter().any(|l| l == PKCS8_LABEL) {
        PKCS8_LABEL
    } else {
        PKCS1_LABEL
    };

    let payload: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err(CryptoError::EmptyKeyMaterial);
    }

    let mut pem = format!("-----BEGIN {label}-----\n");
    for line in payload.chunks(LINE_WIDTH) {
        pem.extend(line);
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    Ok(pem)
}

/// 秘密鍵のBEGIN/ENDマーカーを取り除き、本体とBEGINラベルの一覧を返す。
/// 秘密鍵以外のマーカーはそのまま残す（後段の署名で不正鍵として検出される）。
fn strip_markers(key: &str) -> (String, Vec<String>) {
    let mut body = String::with_capacity(key.len());
    let mut labels = Vec::new();
    let mut rest = key;

    while let Some(start) = rest.find("-----") {
        let after = &rest[start + 5..];
        let Some(end) = after.find("-----") else {
            break;
        };
        let inner = &after[..end];
        let marker = inner
            .strip_prefix("BEGIN ")
            .map(|label| (true, label))
            .or_else(|| inner.strip_prefix("END ").map(|label| (false, label)));

        match marker {
            Some((is_begin, label)) if label.ends_with(PKCS8_LABEL) => {
                body.push_str(&rest[..start]);
                if is_begin {
                    labels.push(label.to_string());
                }
                rest = &after[end + 5..];
            }
            _ => {
                body.push_str(&rest[..start + 5]);
                rest = after;
            }
        }
    }
    body.push_str(rest);

    (body, labels)
}
