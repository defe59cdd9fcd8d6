//! Connection bootstrap shared by the operations.

use dirrepl_connect::{
    close_quietly, ConnectionSpec, Connector, DirectoryConnection, DirectoryError,
};

use crate::error::ReplError;

/// Connect to one endpoint.
pub async fn connect_one(
    connector: &dyn Connector,
    spec: &ConnectionSpec,
) -> Result<Box<dyn DirectoryConnection>, ReplError> {
    connector.connect(spec).await.map_err(|e| ReplError::Connect {
        failures: vec![(spec.host_port(), e)],
    })
}

/// Connect to both endpoints of a two-server operation.
///
/// Both endpoints are tried even when the first fails, so one round trip
/// reports every unreachable server. A connection that did succeed is closed
/// before the error is returned.
pub async fn connect_both(
    connector: &dyn Connector,
    spec1: &ConnectionSpec,
    spec2: &ConnectionSpec,
) -> Result<(Box<dyn DirectoryConnection>, Box<dyn DirectoryConnection>), ReplError> {
    let r1 = connector.connect(spec1).await;
    let r2 = connector.connect(spec2).await;
    match (r1, r2) {
        (Ok(c1), Ok(c2)) => Ok((c1, c2)),
        (r1, r2) => {
            let mut failures: Vec<(dirrepl_connect::HostPort, DirectoryError)> = Vec::new();
            for (spec, result) in [(spec1, r1), (spec2, r2)] {
                match result {
                    Ok(conn) => close_quietly(conn.as_ref()).await,
                    Err(e) => failures.push((spec.host_port(), e)),
                }
            }
            Err(ReplError::Connect { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use dirrepl_connect::{Dn, HostPort, MemoryDirectory, TlsMode, TrustPolicy};

    struct OneServer(MemoryDirectory);

    #[async_trait]
    impl Connector for OneServer {
        async fn connect(
            &self,
            spec: &ConnectionSpec,
        ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
            if spec.host_port() != self.0.host_port() {
                return Err(DirectoryError::Transport {
                    host_port: spec.host_port().to_string(),
                    msg: "connection refused".into(),
                });
            }
            Ok(Box::new(self.0.bind(&spec.bind_dn, &spec.password)?))
        }
    }

    fn spec(host: &str) -> ConnectionSpec {
        ConnectionSpec {
            host: host.into(),
            port: 1389,
            tls: TlsMode::None,
            bind_dn: Dn::new("cn=Directory Manager"),
            password: "secret".into(),
            trust: TrustPolicy::TrustAll,
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_both_failures_reported_and_good_conn_closed() {
        let dir = MemoryDirectory::new("up", 1389, "secret");
        let connector = OneServer(dir.clone());
        let err = connect_both(&connector, &spec("up"), &spec("down"))
            .await
            .unwrap_err();
        match err {
            ReplError::Connect { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, HostPort::new("down", 1389));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dir.open_connections(), 0);
    }
}
