//! The license state holder.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use appgrid_bus::{BusMessage, MessageBus};
use appgrid_core::{epoch_secs, subjects};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cipher::LicenseKey;
use crate::error::{LicenseError, LicenseResult, QuotaError};
use crate::license::{License, cap};

/// Envelope accepted in place of a bare payload string.
#[derive(Deserialize)]
struct Envelope {
    license: String,
}

pub struct LicenseGate {
    bus: Arc<dyn MessageBus>,
    key: Option<LicenseKey>,
    current: RwLock<Option<License>>,
}

impl LicenseGate {
    pub fn new(bus: Arc<dyn MessageBus>, key: Option<LicenseKey>) -> Self {
        if key.is_none() {
            info!("no license key configured, running as community edition");
        }
        Self {
            bus,
            key,
            current: RwLock::new(None),
        }
    }

    /// Build from the optional hex key in config. A malformed key is an error.
    pub fn from_config(bus: Arc<dyn MessageBus>, hex_key: Option<&str>) -> LicenseResult<Self> {
        let key = hex_key
            .filter(|k| !k.trim().is_empty())
            .map(LicenseKey::from_hex)
            .transpose()?;
        Ok(Self::new(bus, key))
    }

    /// Decrypt a payload and install it.
    pub fn load_payload(&self, payload: &[u8]) -> LicenseResult<License> {
        let key = self.key.as_ref().ok_or(LicenseError::NoKey)?;
        let text = payload_text(payload)?;
        let license = key.open(&text)?;
        self.install(license.clone());
        Ok(license)
    }

    pub fn install(&self, license: License) {
        info!(
            edition = %license.edition,
            expires_at = license.expires_at,
            features = license.features.len(),
            "license installed"
        );
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(license);
    }

    /// The license in effect at `now`; community when none or expired.
    pub fn effective_at(&self, now: u64) -> License {
        let loaded = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match loaded {
            Some(l) if !l.is_expired_at(now) => l,
            _ => License::community(),
        }
    }

    pub fn effective(&self) -> License {
        self.effective_at(epoch_secs())
    }

    pub fn edition(&self) -> String {
        self.effective().edition
    }

    /// Check the totals a create would produce against licensed caps.
    pub fn check_quota(&self, apps: u64, users: u64) -> Result<(), QuotaError> {
        let license = self.effective();
        if let Some(limit) = cap(license.max_apps)
            && apps > u64::from(limit)
        {
            return Err(QuotaError {
                resource: "apps",
                limit,
                requested: apps,
            });
        }
        if let Some(limit) = cap(license.max_users)
            && users > u64::from(limit)
        {
            return Err(QuotaError {
                resource: "users",
                limit,
                requested: users,
            });
        }
        Ok(())
    }

    /// Ask the control service for the latest license. Failure leaves
    /// the current state untouched.
    pub async fn refresh(&self, timeout: Duration) -> LicenseResult<License> {
        let request = BusMessage::new(subjects::LICENSE_REQUEST, Vec::<u8>::new());
        let reply = self.bus.request(request, timeout).await?.into_result()?;
        self.load_payload(&reply.payload)
    }

    /// Listen for pushed licenses until shutdown.
    pub async fn listen(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> LicenseResult<JoinHandle<()>> {
        let mut pushes = self.bus.subscribe(subjects::LICENSE_PUSH).await?;
        let gate = self;
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = pushes.next() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = gate.load_payload(&msg.payload) {
                            warn!(error = %e, "rejected pushed license");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("license listener shutting down");
                        break;
                    }
                }
            }
        }))
    }
}

fn payload_text(payload: &[u8]) -> LicenseResult<String> {
    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        let env: Envelope = serde_json::from_str(trimmed)?;
        return Ok(env.license);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgrid_bus::{BusExt, MemoryBus, ReplyStatus};

    fn key() -> LicenseKey {
        LicenseKey::from_bytes(&[7u8; 32]).unwrap()
    }

    fn enterprise(expires_at: u64) -> License {
        let mut l = License::community();
        l.edition = "enterprise".to_string();
        l.expires_at = expires_at;
        l.features.insert("audit".to_string(), true);
        l.features.insert("sso".to_string(), false);
        l.max_apps = Some(2);
        l.max_users = Some(1);
        l
    }

    fn gate(bus: MemoryBus) -> LicenseGate {
        LicenseGate::new(Arc::new(bus), Some(key()))
    }

    #[test]
    fn community_until_loaded() {
        let g = gate(MemoryBus::new());
        assert_eq!(g.edition(), "community");
        assert!(!g.effective().feature("audit"));
        assert!(g.check_quota(1000, 1000).is_ok());
    }

    #[test]
    fn loaded_license_gates_features_and_quotas() {
        let g = gate(MemoryBus::new());
        let payload = key().seal(&enterprise(0)).unwrap();
        g.load_payload(payload.as_bytes()).unwrap();

        assert_eq!(g.edition(), "enterprise");
        assert!(g.effective().feature("audit"));
        assert!(!g.effective().feature("sso"));
        assert!(g.check_quota(2, 1).is_ok());
        let err = g.check_quota(3, 1).unwrap_err();
        assert_eq!(err.resource, "apps");
        assert_eq!(g.check_quota(1, 2).unwrap_err().resource, "users");
    }

    #[test]
    fn expired_license_degrades() {
        let g = gate(MemoryBus::new());
        g.install(enterprise(100));
        assert!(g.effective_at(99).feature("audit"));
        assert!(!g.effective_at(100).feature("audit"));
        assert_eq!(g.effective_at(200).edition, "community");
    }

    #[test]
    fn install_recovers_a_poisoned_slot() {
        let g = Arc::new(gate(MemoryBus::new()));
        let holder = Arc::clone(&g);
        let _ = std::thread::spawn(move || {
            let _slot = holder.current.write().unwrap();
            panic!("writer died holding the slot");
        })
        .join();
        assert!(g.current.is_poisoned());

        g.install(enterprise(0));
        assert_eq!(g.edition(), "enterprise");
    }

    #[test]
    fn bad_payload_keeps_previous_license() {
        let g = gate(MemoryBus::new());
        g.install(enterprise(0));
        assert!(g.load_payload(b"garbage").is_err());
        assert_eq!(g.edition(), "enterprise");
    }

    #[test]
    fn envelope_payload_accepted() {
        let g = gate(MemoryBus::new());
        let payload = key().seal(&enterprise(0)).unwrap();
        let body = serde_json::json!({ "license": payload }).to_string();
        g.load_payload(body.as_bytes()).unwrap();
        assert!(g.effective().feature("audit"));
    }

    #[test]
    fn no_key_rejects_payloads() {
        let g = LicenseGate::from_config(Arc::new(MemoryBus::new()), Some("  ")).unwrap();
        assert!(matches!(g.load_payload(b"abc"), Err(LicenseError::NoKey)));
    }

    #[tokio::test]
    async fn refresh_requests_from_control_service() {
        let bus = MemoryBus::new();
        let mut requests = bus.subscribe(subjects::LICENSE_REQUEST).await.unwrap();
        let control = bus.clone();
        tokio::spawn(async move {
            while let Some(req) = requests.next().await {
                let payload = key().seal(&enterprise(0)).unwrap();
                control
                    .respond(&req, ReplyStatus::ok(), payload.into_bytes().into())
                    .await
                    .unwrap();
            }
        });

        let g = gate(bus);
        let license = g.refresh(Duration::from_secs(1)).await.unwrap();
        assert_eq!(license.edition, "enterprise");
        assert!(g.effective().feature("audit"));
    }

    #[tokio::test]
    async fn refresh_without_control_service_fails_softly() {
        let g = gate(MemoryBus::new());
        assert!(g.refresh(Duration::from_millis(50)).await.is_err());
        assert_eq!(g.edition(), "community");
    }

    #[tokio::test]
    async fn pushed_license_is_installed() {
        let bus = MemoryBus::new();
        let g = Arc::new(gate(bus.clone()));
        let (_tx, rx) = watch::channel(false);
        let _handle = g.clone().listen(rx).await.unwrap();

        let payload = key().seal(&enterprise(0)).unwrap();
        bus.publish(BusMessage::new(subjects::LICENSE_PUSH, payload.into_bytes()))
            .await
            .unwrap();

        for _ in 0..50 {
            if g.effective().feature("audit") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(g.effective().feature("audit"));
    }
}
