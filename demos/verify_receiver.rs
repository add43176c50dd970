use webhook_dispatch::{sign_payload, verify_webhook_request, DEFAULT_SIGNATURE_HEADER};

fn main() {
    let secret = "supersecret";
    let payload = br#"{"id":"evt_123","event":"file.uploaded","data":{}}"#;

    // What the sender would attach to the request.
    let signature = sign_payload(payload, secret);
    let headers = [
        ("content-type", "application/json"),
        ("x-hub-signature-256", signature.as_str()),
    ];

    match verify_webhook_request(headers, payload, secret, DEFAULT_SIGNATURE_HEADER) {
        Ok(()) => println!("signature ok"),
        Err(e) => println!("rejected: {e}"),
    }

    let tampered = br#"{"id":"evt_123","event":"file.deleted","data":{}}"#;
    if let Err(e) = verify_webhook_request(headers, tampered, secret, DEFAULT_SIGNATURE_HEADER) {
        println!("tampered payload rejected: {e}");
    }
}
