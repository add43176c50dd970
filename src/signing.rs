use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag that prefixes every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Default header carrying the signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

fn mac_for(secret: &[u8], payload: &[u8]) -> HmacSha256 {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac
}

/// Compute `sha256=<hex>` over the exact bytes that will be transmitted.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let digest = mac_for(secret.as_bytes(), payload).finalize().into_bytes();
    format!("{SIGNATURE_PREFIX}{}", hex::encode(digest))
}

/// Check a `sha256=<hex>` signature against `payload`.
///
/// The digest comparison is constant-time. Any malformed input yields `false`.
pub fn verify_signature(payload: &[u8], secret: &str, provided: &str) -> bool {
    let Some(hex_digest) = provided.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_digest) else {
        return false;
    };

    mac_for(secret.as_bytes(), payload)
        .verify_slice(&signature)
        .is_ok()
}

/// Find the signature header among `(name, value)` pairs, ignoring case.
pub fn parse_signature_header<'a, I>(headers: I, signature_header: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(signature_header))
        .map(|(_, value)| value)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("signature header missing")]
    MissingSignature,

    #[error("signature header is not of the form sha256=<hex>")]
    MalformedSignature,

    #[error("signature does not match payload")]
    InvalidSignature,
}

/// Receiver-side check of an incoming delivery in one call.
pub fn verify_webhook_request<'a, I>(
    headers: I,
    payload: &[u8],
    secret: &str,
    signature_header: &str,
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let signature = parse_signature_header(headers, signature_header)
        .ok_or(VerificationError::MissingSignature)?;

    let well_formed = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .is_some_and(|digest| hex::decode(digest).is_ok());
    if !well_formed {
        return Err(VerificationError::MalformedSignature);
    }

    if verify_signature(payload, secret, signature) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"id":"evt-1","event":"file.uploaded"}"#;

    #[test]
    fn signature_format() {
        let signature = sign_payload(PAYLOAD, "s3cr3t");
        let digest = signature.strip_prefix("sha256=").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let signature = sign_payload(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn round_trip() {
        let signature = sign_payload(PAYLOAD, "s3cr3t");
        assert!(verify_signature(PAYLOAD, "s3cr3t", &signature));
    }

    #[test]
    fn rejects_mutations() {
        let signature = sign_payload(PAYLOAD, "s3cr3t");

        let mut tampered = PAYLOAD.to_vec();
        tampered[3] ^= 0x01;
        assert!(!verify_signature(&tampered, "s3cr3t", &signature));
        assert!(!verify_signature(PAYLOAD, "other", &signature));
        assert!(!verify_signature(PAYLOAD, "s3cr3t", signature.trim_start_matches("sha256=")));
        assert!(!verify_signature(PAYLOAD, "s3cr3t", "sha256=zz"));
        assert!(!verify_signature(PAYLOAD, "s3cr3t", "sha256="));
        assert!(!verify_signature(PAYLOAD, "s3cr3t", ""));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = [("content-type", "application/json"), ("x-hub-signature-256", "sha256=00")];
        assert_eq!(
            parse_signature_header(headers, DEFAULT_SIGNATURE_HEADER),
            Some("sha256=00")
        );
    }

    #[test]
    fn request_verification_errors() {
        let signature = sign_payload(PAYLOAD, "s3cr3t");

        let ok = [(DEFAULT_SIGNATURE_HEADER, signature.as_str())];
        assert_eq!(
            verify_webhook_request(ok, PAYLOAD, "s3cr3t", DEFAULT_SIGNATURE_HEADER),
            Ok(())
        );

        let none: [(&str, &str); 0] = [];
        assert_eq!(
            verify_webhook_request(none, PAYLOAD, "s3cr3t", DEFAULT_SIGNATURE_HEADER),
            Err(VerificationError::MissingSignature)
        );

        let malformed = [(DEFAULT_SIGNATURE_HEADER, "md5=abc")];
        assert_eq!(
            verify_webhook_request(malformed, PAYLOAD, "s3cr3t", DEFAULT_SIGNATURE_HEADER),
            Err(VerificationError::MalformedSignature)
        );

        assert_eq!(
            verify_webhook_request(ok, b"{}", "s3cr3t", DEFAULT_SIGNATURE_HEADER),
            Err(VerificationError::InvalidSignature)
        );
    }
}
