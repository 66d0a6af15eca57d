//! Broker addresses and the rumqttc transport built for them.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::Transport;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use crate::config::MqttSettings;

/// Where the MQTT client connects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Accepts `host:port` or `[v6]:port`, optionally behind an `mqtt://`,
    /// `tcp://`, `mqtts://` or `ssl://` scheme. The last two switch TLS on;
    /// `force_tls` switches it on for the rest.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let trimmed = addr.trim();
        let (secure, authority) = match trimmed.split_once("://") {
            None => (false, trimmed),
            Some(("mqtt" | "tcp", rest)) => (false, rest),
            Some(("mqtts" | "ssl", rest)) => (true, rest),
            Some((scheme, _)) => bail!("unsupported MQTT scheme '{}' in {}", scheme, addr),
        };

        let (host, port) = authority
            .strip_prefix('[')
            .and_then(|v6| v6.split_once("]:"))
            .or_else(|| authority.rsplit_once(':'))
            .ok_or_else(|| anyhow!("MQTT address {} has no port", addr))?;
        if host.is_empty() {
            bail!("MQTT address {} has no host", addr);
        }
        let port = port
            .parse::<u16>()
            .with_context(|| format!("MQTT address {} has an invalid port", addr))?;

        Ok(Self {
            host: host.to_string(),
            port,
            use_tls: force_tls || secure,
        })
    }

    /// `localhost` or a loopback IP literal.
    pub fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }

    pub fn require_loopback(&self) -> Result<()> {
        if self.is_loopback() {
            return Ok(());
        }
        Err(anyhow!(
            "MQTT broker {} is not on loopback; set ALLOW_REMOTE_MQTT=true to use it",
            self
        ))
    }
}

impl fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Certificate and private key presented for mutual TLS.
#[derive(Clone, Debug)]
pub struct ClientIdentity {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// PEM material read from the paths in `MqttSettings`.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// CA bundle. The rustls default roots apply when absent.
    pub ca: Option<Vec<u8>>,
    pub identity: Option<ClientIdentity>,
}

impl TlsMaterials {
    pub fn from_settings(settings: &MqttSettings) -> Result<Self> {
        let ca = settings
            .ca_path
            .as_deref()
            .map(|path| read_pem(path, "CA bundle"))
            .transpose()?;
        let identity = match (
            settings.client_cert_path.as_deref(),
            settings.client_key_path.as_deref(),
        ) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert: read_pem(cert, "client certificate")?,
                key: read_pem(key, "client key")?,
            }),
            _ => bail!("MQTT client certificate and key must be configured together"),
        };
        Ok(Self { ca, identity })
    }

    fn is_empty(&self) -> bool {
        self.ca.is_none() && self.identity.is_none()
    }

    /// Transport for `endpoint`. Material configured for a plain-TCP broker
    /// is an error, as is a client identity without a CA bundle.
    pub fn transport_for(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        match (endpoint.use_tls, &self.ca) {
            (false, _) if self.is_empty() => Ok(Transport::tcp()),
            (false, _) => bail!(
                "TLS material configured for plain-TCP broker {}; set mqtt.use_tls or use mqtts://",
                endpoint
            ),
            (true, None) if self.identity.is_some() => {
                bail!("an MQTT CA bundle is required with a client certificate")
            }
            (true, None) => Ok(Transport::tls_with_default_config()),
            (true, Some(ca)) => Ok(Transport::tls(
                ca.clone(),
                self.identity.clone().map(|id| (id.cert, id.key)),
                None,
            )),
        }
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read MQTT {} {}", what, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn endpoint(addr: &str) -> MqttEndpoint {
        MqttEndpoint::parse(addr, false).unwrap()
    }

    #[test]
    fn bare_host_port_is_plain_tcp() {
        let ep = endpoint("127.0.0.1:1883");
        assert_eq!((ep.host.as_str(), ep.port, ep.use_tls), ("127.0.0.1", 1883, false));
        assert!(MqttEndpoint::parse("127.0.0.1:8883", true).unwrap().use_tls);
    }

    #[test]
    fn secure_schemes_enable_tls() {
        for addr in ["mqtts://broker.lan:8883", "ssl://broker.lan:8883"] {
            let ep = endpoint(addr);
            assert_eq!(ep.host, "broker.lan");
            assert!(ep.use_tls, "{}", addr);
        }
        assert!(!endpoint("tcp://broker.lan:1883").use_tls);
    }

    #[test]
    fn bracketed_ipv6_round_trips_through_display() {
        let ep = endpoint("[::1]:1883");
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.to_string(), "mqtt://[::1]:1883");
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for addr in ["ws://127.0.0.1:1883", "127.0.0.1", "127.0.0.1:http", ":1883", "[::1]"] {
            assert!(MqttEndpoint::parse(addr, false).is_err(), "{}", addr);
        }
    }

    #[test]
    fn loopback_hosts_pass_and_remote_hosts_fail() {
        for addr in ["localhost:1883", "127.0.0.1:1883", "[::1]:1883", "127.0.1.1:1883"] {
            assert!(endpoint(addr).require_loopback().is_ok(), "{}", addr);
        }
        let err = endpoint("test.mosquitto.org:1883")
            .require_loopback()
            .unwrap_err();
        assert!(err.to_string().contains("ALLOW_REMOTE_MQTT"));
    }

    #[test]
    fn half_configured_client_identity_is_rejected() {
        let settings = MqttSettings {
            client_cert_path: Some("/nonexistent/cert.pem".into()),
            ..MqttSettings::default()
        };
        let err = TlsMaterials::from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("together"));
    }

    #[test]
    fn ca_bundle_is_read_from_disk() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        ca.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let settings = MqttSettings {
            ca_path: Some(ca.path().to_path_buf()),
            ..MqttSettings::default()
        };
        let materials = TlsMaterials::from_settings(&settings).unwrap();
        assert_eq!(materials.ca.as_deref(), Some(&b"-----BEGIN CERTIFICATE-----\n"[..]));
        assert!(materials.transport_for(&endpoint("mqtts://localhost:8883")).is_ok());
    }

    #[test]
    fn material_on_plain_tcp_is_rejected() {
        let materials = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            identity: None,
        };
        let plain = endpoint("127.0.0.1:1883");
        assert!(materials.transport_for(&plain).is_err());
        assert!(TlsMaterials::default().transport_for(&plain).is_ok());
    }

    #[test]
    fn identity_without_ca_is_rejected() {
        let materials = TlsMaterials {
            ca: None,
            identity: Some(ClientIdentity {
                cert: b"cert".to_vec(),
                key: b"key".to_vec(),
            }),
        };
        assert!(materials
            .transport_for(&endpoint("mqtts://localhost:8883"))
            .is_err());
    }
}
