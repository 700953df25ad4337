// src/core/scanner/port_scanner.rs

use std::collections::BTreeMap;
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, error, info};
use x509_parser::objects::{oid_registry, oid2sn};
use x509_parser::prelude::*;

use crate::core::control::ControlHandle;
use crate::core::error::ScanResult;
use crate::core::models::{PortFinding, PortParams, PortStatus, TlsInfo};
use crate::core::progress::{ProgressFn, ignore_progress};
use crate::core::scanner::retry::RetryPolicy;
use crate::core::scanner::{Probe, dedup_targets, fan_out, positive_seconds};

/// Ports where a TLS handshake is attempted after a successful connect.
pub const TLS_PORTS: [u16; 5] = [443, 8443, 993, 995, 465];

const BANNER_PROBE: &[u8] = b"\r\n\r\n";

/// Tunables of the port prober that are not part of a job's parameters.
#[derive(Debug, Clone)]
pub struct PortScanConfig {
    pub concurrency: usize,
    pub banner_bytes: usize,
    pub banner_timeout: Duration,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 200,
            banner_bytes: 128,
            banner_timeout: Duration::from_secs(1),
        }
    }
}

/// TCP connect prober over a host × port cross product.
#[derive(Debug, Clone, Default)]
pub struct PortScanner {
    config: PortScanConfig,
}

impl PortScanner {
    pub fn new(config: PortScanConfig) -> Self {
        Self { config }
    }

    /// Probes every (host, port) pair in `params`.
    ///
    /// Every pair yields a result: open ports carry an optional banner and,
    /// on TLS ports, certificate details; unreachable ones are reported as
    /// closed with the last connect error.
    ///
    /// # Arguments
    /// * `params` - Hosts, ports, connect timeout and retry budget.
    /// * `control` - Cancel/pause signals of the run.
    /// * `progress` - Percentage callback; always ends with 100.
    pub async fn run(
        &self,
        params: &PortParams,
        control: &ControlHandle,
        progress: ProgressFn<'_>,
    ) -> ScanResult<Vec<PortFinding>> {
        let connect_timeout = positive_seconds(params.timeout, "port timeout")?;

        let targets = dedup_targets(params.targets.iter().flat_map(|host| {
            let host = host.trim().to_string();
            params.ports.iter().map(move |port| (host.clone(), *port))
        }))
        .into_iter()
        .filter(|(host, _)| !host.is_empty())
        .collect::<Vec<_>>();

        info!(targets = targets.len(), "Starting port scan.");
        let prober = PortProber {
            connect_timeout,
            policy: RetryPolicy::new(params.retries),
            config: self.config.clone(),
        };
        let results = fan_out(&prober, targets, self.config.concurrency, control, progress).await?;
        let open = results.iter().filter(|r| r.status == PortStatus::Open).count();
        info!(results = results.len(), open, "Port scan finished.");
        Ok(results)
    }
}

/// Standalone entry point: probes without a job, ignoring progress.
pub async fn scan_ports(
    targets: Vec<String>,
    ports: Vec<u16>,
    timeout_secs: f64,
    retries: u32,
) -> ScanResult<Vec<PortFinding>> {
    let params = PortParams {
        targets,
        ports,
        timeout: timeout_secs,
        retries,
    };
    PortScanner::default()
        .run(&params, &ControlHandle::new(), &ignore_progress)
        .await
}

struct PortProber {
    connect_timeout: Duration,
    policy: RetryPolicy,
    config: PortScanConfig,
}

#[async_trait]
impl Probe for PortProber {
    type Target = (String, u16);
    type Finding = PortFinding;

    async fn probe(&self, target: &(String, u16), _control: &ControlHandle) -> Option<PortFinding> {
        let (host, port) = (target.0.as_str(), target.1);
        let mut result = PortFinding {
            target: host.to_string(),
            port,
            status: PortStatus::Closed,
            banner: None,
            error: None,
            tls_info: None,
        };

        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match connect(host, port, self.connect_timeout).await {
                Ok(stream) => break Some(stream),
                Err(e) => {
                    debug!(host, port, attempt, error = %e, "Connect failed.");
                    result.error = Some(e);
                    if !self.policy.should_retry(attempt) {
                        break None;
                    }
                }
            }
        };

        let Some(stream) = stream else {
            return Some(result);
        };
        result.status = PortStatus::Open;
        result.error = None;
        result.banner = grab_banner(stream, self.config.banner_bytes, self.config.banner_timeout).await;
        debug!(host, port, banner = result.banner.is_some(), "Port open.");

        if TLS_PORTS.contains(&port) {
            result.tls_info = fetch_tls_info(host, port, self.connect_timeout).await;
        }
        Some(result)
    }
}

async fn connect(host: &str, port: u16, limit: Duration) -> Result<TcpStream, String> {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connect timed out after {:.1}s", limit.as_secs_f64())),
    }
}

/// Nudges the service and reads whatever it volunteers. Best-effort.
async fn grab_banner(mut stream: TcpStream, budget: usize, limit: Duration) -> Option<String> {
    let mut buf = vec![0u8; budget];
    let read = timeout(limit, async {
        stream.write_all(BANNER_PROBE).await?;
        stream.read(&mut buf).await
    })
    .await;
    let _ = stream.shutdown().await;

    match read {
        Ok(Ok(n)) if n > 0 => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
        _ => None,
    }
}

async fn fetch_tls_info(host: &str, port: u16, limit: Duration) -> Option<TlsInfo> {
    let host_owned = host.to_string();
    debug!(host, port, "Spawning blocking task for TLS handshake.");
    match spawn_blocking(move || perform_tls_handshake(&host_owned, port, limit)).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "TLS details unavailable.");
            None
        }
        Err(e) => {
            error!(panic = %e, "Blocking TLS task panicked!");
            None
        }
    }
}

fn perform_tls_handshake(host: &str, port: u16, limit: Duration) -> Result<TlsInfo, String> {
    // Recon wants the certificate even when it would not be trusted.
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| format!("TlsConnector Error: {}", e))?;

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("Address Resolution Error: {}", e))?
        .next()
        .ok_or_else(|| format!("No address found for {}", host))?;
    let stream = StdTcpStream::connect_timeout(&addr, limit)
        .map_err(|e| format!("TCP Connection Error: {}", e))?;
    stream
        .set_read_timeout(Some(limit))
        .and_then(|_| stream.set_write_timeout(Some(limit)))
        .map_err(|e| format!("Socket Setup Error: {}", e))?;

    let mut stream = connector
        .connect(host, stream)
        .map_err(|e| format!("TLS Handshake Error: {}", e))?;

    let cert = stream
        .peer_certificate()
        .map_err(|e| format!("Could not get peer certificate: {}", e))?
        .ok_or_else(|| "Server did not provide a certificate.".to_string())?;
    let cert_der = cert
        .to_der()
        .map_err(|e| format!("Could not convert certificate to DER: {}", e))?;
    let _ = stream.shutdown();

    tls_info_from_der(&cert_der)
}

fn tls_info_from_der(cert_der: &[u8]) -> Result<TlsInfo, String> {
    let (_, x509) =
        parse_x509_certificate(cert_der).map_err(|e| format!("X.509 Parse Error: {}", e))?;
    let validity = x509.validity();

    Ok(TlsInfo {
        subject: name_attributes(x509.subject()),
        issuer: name_attributes(x509.issuer()),
        not_after: cert_time(&validity.not_after),
        not_before: cert_time(&validity.not_before),
    })
}

/// Flattens an X.509 name into `longName -> value`, e.g. `commonName -> example.com`.
fn name_attributes(name: &X509Name) -> BTreeMap<String, String> {
    name.iter_attributes()
        .filter_map(|attr| {
            let key = oid2sn(attr.attr_type(), oid_registry())
                .map(str::to_string)
                .unwrap_or_else(|_| attr.attr_type().to_id_string());
            attr.as_str().ok().map(|value| (key, value.to_string()))
        })
        .collect()
}

/// Renders a certificate time like `Jun  1 12:00:00 2025 GMT`.
fn cert_time(time: &ASN1Time) -> String {
    format_cert_time(DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default())
}

fn format_cert_time(at: DateTime<Utc>) -> String {
    at.format("%b %e %H:%M:%S %Y GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ScanError;
    use chrono::TimeZone;
    use tokio::net::TcpListener;

    #[test]
    fn cert_times_pad_single_digit_days() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_cert_time(at), "Jun  1 12:00:00 2025 GMT");
        let at = Utc.with_ymd_and_hms(2025, 12, 24, 8, 5, 9).unwrap();
        assert_eq!(format_cert_time(at), "Dec 24 08:05:09 2025 GMT");
    }

    const SELF_SIGNED_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBrDCCAVOgAwIBAgIURFeerAFXAS6uBi0O9TAmhEdRnIswCgYIKoZIzj0EAwIw
LDEUMBIGA1UEAwwLcmVjb254LnRlc3QxFDASBgNVBAoMC1JlY29uWCBUZXN0MB4X
DTI1MDYwMTEyMDAwMFoXDTM1MDYwMTEyMDAwMFowLDEUMBIGA1UEAwwLcmVjb254
LnRlc3QxFDASBgNVBAoMC1JlY29uWCBUZXN0MFkwEwYHKoZIzj0CAQYIKoZIzj0D
AQcDQgAE+L9FUAnzFPAxh7nUyJa99MyrjoD8TV5wpwPA4KL/qmuZn5UJPVrFoL7C
cLQp0EHrNvwpEEQUTe67rbsvIOAbKKNTMFEwHQYDVR0OBBYEFEDzAPwfS04HsUbV
xuiitqBHBmCcMB8GA1UdIwQYMBaAFEDzAPwfS04HsUbVxuiitqBHBmCcMA8GA1Ud
EwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDRwAwRAIga1p/24EymnrzoJNxM9Y88r2R
1wyvF7sTYhTYRDskH7wCIGXUp80d4LsIuFgQ1KWkNsHsdFohVpNePl3Lx1dJyjYV
-----END CERTIFICATE-----
";

    #[test]
    fn certificate_details_use_attribute_names() {
        let (_, pem) = x509_parser::pem::parse_x509_pem(SELF_SIGNED_PEM.as_bytes()).unwrap();
        let info = tls_info_from_der(&pem.contents).unwrap();

        let expected = BTreeMap::from([
            ("commonName".to_string(), "reconx.test".to_string()),
            ("organizationName".to_string(), "ReconX Test".to_string()),
        ]);
        assert_eq!(info.subject, expected);
        assert_eq!(info.issuer, expected);
        assert_eq!(info.not_before, "Jun  1 12:00:00 2025 GMT");
        assert_eq!(info.not_after, "Jun  1 12:00:00 2035 GMT");

        let payload = serde_json::to_value(&info).unwrap();
        assert_eq!(payload["subject"]["commonName"], "reconx.test");
        assert_eq!(payload["notAfter"], "Jun  1 12:00:00 2035 GMT");
        assert_eq!(payload["notBefore"], "Jun  1 12:00:00 2025 GMT");
    }

    #[test]
    fn garbage_certificate_is_an_error() {
        assert!(tls_info_from_der(b"not a certificate").is_err());
    }

    #[tokio::test]
    async fn discard_port_on_loopback_is_closed() {
        let results = scan_ports(vec!["127.0.0.1".into()], vec![9], 0.2, 0)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, PortStatus::Closed);
        assert!(results[0].error.is_some());
        assert!(results[0].tls_info.is_none());
    }

    #[tokio::test]
    async fn open_port_reports_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
                let mut sink = [0u8; 16];
                let _ = socket.read(&mut sink).await;
            }
        });

        let results = scan_ports(vec!["127.0.0.1".into()], vec![port], 2.0, 1)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, PortStatus::Open);
        assert!(results[0].error.is_none());
        assert_eq!(results[0].banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6\r\n"));
    }

    #[tokio::test]
    async fn duplicate_pairs_are_probed_once() {
        let params = PortParams {
            targets: vec!["127.0.0.1".into(), "127.0.0.1".into(), " ".into()],
            ports: vec![9, 9],
            timeout: 0.2,
            retries: 0,
        };
        let results = PortScanner::default()
            .run(&params, &ControlHandle::new(), &ignore_progress)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn unusable_timeouts_are_rejected() {
        for timeout in [0.0, -1.0, f64::NAN, 1e30] {
            let err = scan_ports(vec!["127.0.0.1".into()], vec![9], timeout, 0)
                .await
                .unwrap_err();
            assert!(matches!(err, ScanError::InvalidParams(_)), "timeout {timeout}");
        }
    }
}
