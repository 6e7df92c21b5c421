//! etcd membership strings built from the ordered host list

use crate::host::Host;

/// Bootstrap peer list: `etcd-<hostname>=https://<internal>:2380,...`
pub fn initial_cluster(hosts: &[Host]) -> String {
    hosts
        .iter()
        .map(|h| format!("{}={}", h.etcd_member_name(), h.etcd_peer_url()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Client endpoints: `https://<internal>:2379,...`
pub fn client_endpoints(hosts: &[Host]) -> String {
    hosts
        .iter()
        .map(Host::etcd_client_url)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<Host> {
        vec![
            Host::new("203.0.113.1", "A").with_internal_address("10.0.0.1"),
            Host::new("203.0.113.2", "B").with_internal_address("10.0.0.2"),
            Host::new("203.0.113.3", "C").with_internal_address("10.0.0.3"),
        ]
    }

    #[test]
    fn initial_cluster_keeps_host_order() {
        assert_eq!(
            initial_cluster(&hosts()),
            "etcd-A=https://10.0.0.1:2380,etcd-B=https://10.0.0.2:2380,etcd-C=https://10.0.0.3:2380"
        );
    }

    #[test]
    fn client_endpoints_use_client_port() {
        assert_eq!(
            client_endpoints(&hosts()),
            "https://10.0.0.1:2379,https://10.0.0.2:2379,https://10.0.0.3:2379"
        );
        assert_eq!(client_endpoints(&[]), "");
    }

    #[test]
    fn ipv6_members_are_bracketed() {
        let hosts = vec![
            Host::new("fd00::10", "A").with_internal_address("fd00::1"),
            Host::new("fd00::20", "B").with_internal_address("fd00::2"),
        ];
        assert_eq!(
            initial_cluster(&hosts),
            "etcd-A=https://[fd00::1]:2380,etcd-B=https://[fd00::2]:2380"
        );
        assert_eq!(
            client_endpoints(&hosts),
            "https://[fd00::1]:2379,https://[fd00::2]:2379"
        );
    }
}
