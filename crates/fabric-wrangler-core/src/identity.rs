use crate::error::WranglerError;
use crate::transport::Transport;
use crate::types::Endpoint;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Enrolled signing identity bound to one organization.
pub struct Identity {
    msp_id: String,
    certificate: String,
    signing_key: SigningKey,
}

impl Identity {
    pub fn new(
        msp_id: impl Into<String>,
        certificate: impl Into<String>,
        signing_key: SigningKey,
    ) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate: certificate.into(),
            signing_key,
        }
    }

    /// Builds an identity from a hex encoded 32-byte ed25519 secret.
    pub fn from_hex_key(
        msp_id: impl Into<String>,
        private_key_hex: &str,
        certificate: impl Into<String>,
    ) -> Result<Self, WranglerError> {
        let raw = hex::decode(private_key_hex.trim())
            .map_err(|e| WranglerError::Enrollment(format!("private key is not hex: {}", e)))?;
        let secret: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            WranglerError::Enrollment(format!(
                "private key must be 32 bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self::new(
            msp_id,
            certificate,
            SigningKey::from_bytes(&secret),
        ))
    }

    /// Fresh random identity, mostly useful for sandboxes and tests.
    pub fn generate(msp_id: impl Into<String>, certificate: impl Into<String>) -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(msp_id, certificate, SigningKey::from_bytes(&secret))
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    pub fn creator(&self) -> Creator {
        Creator {
            msp_id: self.msp_id.clone(),
            certificate: self.certificate.clone(),
            public_key: hex::encode(self.signing_key.verifying_key().to_bytes()),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("msp_id", &self.msp_id)
            .field("public_key", &self.creator().public_key)
            .finish_non_exhaustive()
    }
}

/// Public half of an identity, embedded in every proposal header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub msp_id: String,
    pub certificate: String,
    pub public_key: String,
}

impl Creator {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.msp_id.len() + self.certificate.len() + self.public_key.len() + 2,
        );
        out.extend_from_slice(self.msp_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.certificate.as_bytes());
        out.push(0);
        out.extend_from_slice(self.public_key.as_bytes());
        out
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(raw) = hex::decode(&self.public_key) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(raw.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

/// Network client handle. Cheap to clone, shared read-only per call.
#[derive(Clone)]
pub struct ClientHandle {
    transport: Arc<dyn Transport>,
}

impl ClientHandle {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub channel_id: String,
    pub orderers: Vec<Endpoint>,
}

#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub client: ClientHandle,
    pub channel: ChannelHandle,
}

/// Enrolled identity plus the channel it is bound to.
#[derive(Debug, Clone)]
pub struct IdentityContext {
    pub identity: Arc<Identity>,
    pub context: ChannelContext,
}

impl IdentityContext {
    pub fn channel_id(&self) -> &str {
        &self.context.channel.channel_id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentOptions {
    pub msp_id: String,
    pub private_key_hex: String,
    pub certificate: String,
    pub channel_id: String,
    pub orderers: Vec<Endpoint>,
}

/// Produces a bound client/channel pair for an identity.
#[async_trait]
pub trait Enroller: Send + Sync {
    async fn enroll(&self, options: EnrollmentOptions) -> Result<IdentityContext, WranglerError>;
}

/// Enrolls from a pre-issued admin key and certificate; no CA round trip.
pub struct AdminCertEnroller {
    transport: Arc<dyn Transport>,
}

impl AdminCertEnroller {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Enroller for AdminCertEnroller {
    async fn enroll(&self, options: EnrollmentOptions) -> Result<IdentityContext, WranglerError> {
        if options.msp_id.trim().is_empty() {
            return Err(WranglerError::Enrollment("msp id is required".to_string()));
        }
        if options.certificate.trim().is_empty() {
            return Err(WranglerError::Enrollment(
                "admin certificate is required".to_string(),
            ));
        }
        if options.channel_id.trim().is_empty() {
            return Err(WranglerError::Enrollment("channel id is required".to_string()));
        }
        if options.orderers.is_empty() {
            return Err(WranglerError::Enrollment(
                "at least one orderer is required".to_string(),
            ));
        }
        for orderer in &options.orderers {
            orderer
                .validate()
                .map_err(|e| WranglerError::Enrollment(e.to_string()))?;
        }

        let identity = Identity::from_hex_key(
            options.msp_id.trim(),
            &options.private_key_hex,
            options.certificate,
        )?;
        info!(
            msp_id = %identity.msp_id(),
            channel_id = %options.channel_id,
            "enrolled with admin certificate"
        );

        Ok(IdentityContext {
            identity: Arc::new(identity),
            context: ChannelContext {
                client: ClientHandle::new(self.transport.clone()),
                channel: ChannelHandle {
                    channel_id: options.channel_id,
                    orderers: options.orderers,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    fn options() -> EnrollmentOptions {
        EnrollmentOptions {
            msp_id: "Org1MSP".to_string(),
            private_key_hex: hex::encode([7u8; 32]),
            certificate: "-----BEGIN CERTIFICATE-----admin".to_string(),
            channel_id: "mychannel".to_string(),
            orderers: vec![Endpoint::new("grpc://localhost:7050")],
        }
    }

    #[test]
    fn creator_verifies_identity_signatures() {
        let identity = Identity::from_hex_key("Org1MSP", &hex::encode([3u8; 32]), "cert").unwrap();
        let signature = identity.sign(b"proposal bytes");
        let creator = identity.creator();
        assert!(creator.verify(b"proposal bytes", &signature));
        assert!(!creator.verify(b"tampered", &signature));
        assert!(!creator.verify(b"proposal bytes", &[0u8; 12]));
    }

    #[test]
    fn debug_output_hides_secret() {
        let identity = Identity::from_hex_key("Org1MSP", &hex::encode([3u8; 32]), "cert").unwrap();
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains(&hex::encode([3u8; 32])));
        assert!(rendered.contains("Org1MSP"));
    }

    #[tokio::test]
    async fn admin_enrollment_binds_channel() {
        let enroller = AdminCertEnroller::new(Arc::new(ScriptedTransport::default()));
        let ctx = enroller.enroll(options()).await.unwrap();
        assert_eq!(ctx.channel_id(), "mychannel");
        assert_eq!(ctx.identity.msp_id(), "Org1MSP");
        assert_eq!(ctx.context.channel.orderers.len(), 1);
    }

    #[tokio::test]
    async fn admin_enrollment_rejects_bad_material() {
        let enroller = AdminCertEnroller::new(Arc::new(ScriptedTransport::default()));

        let mut bad_key = options();
        bad_key.private_key_hex = "zz".to_string();
        assert!(matches!(
            enroller.enroll(bad_key).await,
            Err(WranglerError::Enrollment(_))
        ));

        let mut short_key = options();
        short_key.private_key_hex = hex::encode([1u8; 16]);
        assert!(matches!(
            enroller.enroll(short_key).await,
            Err(WranglerError::Enrollment(_))
        ));

        let mut no_orderer = options();
        no_orderer.orderers.clear();
        assert!(matches!(
            enroller.enroll(no_orderer).await,
            Err(WranglerError::Enrollment(_))
        ));

        let mut no_msp = options();
        no_msp.msp_id = " ".to_string();
        assert!(matches!(
            enroller.enroll(no_msp).await,
            Err(WranglerError::Enrollment(_))
        ));
    }
}
