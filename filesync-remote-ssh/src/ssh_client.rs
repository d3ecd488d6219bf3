use russh::client::Handler;
use russh::keys::PublicKeyBase64;
use tracing::{info, warn};

pub(crate) struct Client {
    pub allowed_fingerprints: Option<Vec<String>>, // OpenSSH SHA256 base64 or raw base64 keys
}

impl Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fp_sha256 = server_public_key
            .fingerprint(russh::keys::HashAlg::Sha256)
            .to_string();
        if let Some(allowed) = &self.allowed_fingerprints {
            let key_b64 = server_public_key.public_key_base64();
            let ok = allowed.iter().any(|s| s == &fp_sha256 || s == &key_b64);
            if !ok {
                warn!("server key {} is not in the fingerprint list", fp_sha256);
            }
            return Ok(ok);
        }
        info!("accepting server key {} (no fingerprint list)", fp_sha256);
        Ok(true)
    }
}
