//! OpenSSL request/extension profiles.

use std::net::IpAddr;

use serde_json::json;

use crate::error::BootstrapError;
use crate::templates;

/// Profile for the API server certificate: the in-cluster service names, the
/// service IP and the master address as SANs.
///
/// # Errors
/// Returns an error if rendering fails.
pub fn api_server_profile(service_ip: IpAddr, master_host: IpAddr) -> Result<String, BootstrapError> {
    Ok(templates::render(
        templates::APISERVER_OPENSSL_CNF,
        &json!({
            "service_ip": service_ip.to_string(),
            "master_host": master_host.to_string(),
        }),
    )?)
}

/// Profile for a worker certificate: the worker address as its only SAN.
///
/// # Errors
/// Returns an error if rendering fails.
pub fn worker_profile(worker_ip: IpAddr) -> Result<String, BootstrapError> {
    Ok(templates::render(
        templates::WORKER_OPENSSL_CNF,
        &json!({ "worker_ip": worker_ip.to_string() }),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_api_server_profile() {
        let out = api_server_profile(
            IpAddr::V4(Ipv4Addr::new(10, 3, 0, 1)),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )
        .unwrap();

        assert_eq!(
            out,
            "[req]\nreq_extensions = v3_req\ndistinguished_name = req_distinguished_name\n\
             [req_distinguished_name]\n[ v3_req ]\nbasicConstraints = CA:FALSE\n\
             keyUsage = nonRepudiation, digitalSignature, keyEncipherment\n\
             subjectAltName = @alt_names\n[alt_names]\nDNS.1 = kubernetes\n\
             DNS.2 = kubernetes.default\nIP.1 = 10.3.0.1\nIP.2 = 127.0.0.1\n"
        );
    }

    #[test]
    fn test_worker_profile() {
        let out = worker_profile("172.17.0.5".parse().unwrap()).unwrap();
        assert!(out.ends_with("[alt_names]\nIP.1 = 172.17.0.5\n"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn test_ipv6_master() {
        let out = api_server_profile(
            "10.3.0.1".parse().unwrap(),
            "2001:db8::10".parse().unwrap(),
        )
        .unwrap();
        assert!(out.contains("IP.2 = 2001:db8::10\n"));
    }
}
