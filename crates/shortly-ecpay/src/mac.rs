use md5::{Digest, Md5};

/// Compute the CheckMacValue over a parameter set.
///
/// Any existing `CheckMacValue` entry is excluded from the input. Keys are
/// sorted ascending, case-insensitively; the pairs are joined as `key=value`
/// with `&`, wrapped as `HashKey=<key>&…&HashIV=<iv>`, percent-encoded with
/// the gateway's legacy web-form profile (everything outside
/// `A–Z a–z 0–9 - _ . ~` escaped as uppercase hex, encoded spaces sent as
/// `+`), lowercased, MD5-hashed and rendered as uppercase hex. The gateway
/// recomputes the same bytes, so the procedure must match exactly.
pub fn check_mac_value(params: &[(String, String)], hash_key: &str, hash_iv: &str) -> String {
    let mut pairs: Vec<&(String, String)> = params
        .iter()
        .filter(|(k, _)| k.as_str() != "CheckMacValue")
        .collect();
    pairs.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));

    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let raw = format!("HashKey={hash_key}&{joined}&HashIV={hash_iv}");

    // The form profile transmits spaces as `+`; the encoder already escapes
    // `! ' ( ) *` as uppercase hex, which the profile requires.
    let encoded = urlencoding::encode(&raw).replace("%20", "+");

    hex_upper(Md5::digest(encoded.to_lowercase().as_bytes()).as_slice())
}

/// Verify a supplied CheckMacValue against the parameter set.
///
/// Recomputes and compares with plain, case-sensitive equality. Never
/// panics; any malformed input simply fails to match.
pub fn verify_mac(
    params: &[(String, String)],
    supplied: &str,
    hash_key: &str,
    hash_iv: &str,
) -> bool {
    check_mac_value(params, hash_key, hash_iv) == supplied
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02X}");
        s
    })
}
