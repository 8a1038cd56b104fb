//! Reaching a remote host through a bastion
//!
//! The bastion client opens a direct-tcpip channel to the target, and a second
//! SSH session is negotiated over that channel. Either session failing to come
//! up releases everything already acquired, innermost first.

use russh::{Disconnect, client};
use tracing::{debug, info, instrument};

use crate::config::HostKeyPolicy;
use crate::error::{ExecError, HostRole};
use crate::keys::ClientConfig;
use crate::request::ConnectionDescriptor;
use crate::ssh::{ClientHandler, SshClient, authenticate, transport_config};

/// A target session tunnelled through a bastion session
///
/// Both sessions live until [`BastionRelay::close`]; the target session is
/// released before the bastion it rides on.
#[derive(Debug)]
pub struct BastionRelay {
    target: SshClient,
    bastion: SshClient,
}

impl BastionRelay {
    #[must_use]
    pub fn target(&self) -> &SshClient {
        &self.target
    }

    #[must_use]
    pub fn bastion(&self) -> &SshClient {
        &self.bastion
    }

    pub async fn close(self) {
        self.target.close().await;
        self.bastion.close().await;
    }
}

/// Connect to `target` through `bastion`
///
/// # Errors
/// Returns `ExecError::Connection` naming the bastion when it cannot be
/// reached or authenticated, and naming the target host for the tunnelled leg
#[instrument(skip_all, fields(bastion = %bastion.address(), target = %target.address()))]
pub async fn connect_via_bastion(
    bastion: &ConnectionDescriptor,
    bastion_config: &ClientConfig,
    target: &ConnectionDescriptor,
    target_config: &ClientConfig,
    policy: &HostKeyPolicy,
) -> Result<BastionRelay, ExecError> {
    let bastion_client = SshClient::connect(HostRole::Bastion, bastion, bastion_config, policy).await?;

    match open_tunnelled(&bastion_client, target, target_config, policy).await {
        Ok(target_client) => {
            info!("connected to remote host through bastion");
            Ok(BastionRelay {
                target: target_client,
                bastion: bastion_client,
            })
        }
        Err(e) => {
            bastion_client.close().await;
            Err(e)
        }
    }
}

async fn open_tunnelled(
    bastion: &SshClient,
    target: &ConnectionDescriptor,
    target_config: &ClientConfig,
    policy: &HostKeyPolicy,
) -> Result<SshClient, ExecError> {
    let address = target.address();
    debug!(target = %address, "opening tunnel through bastion");

    let channel = bastion
        .handle()
        .channel_open_direct_tcpip(target.host.as_str(), u32::from(target.port), "127.0.0.1", 0)
        .await
        .map_err(|e| {
            ExecError::connection(
                HostRole::Bastion,
                bastion.address(),
                format!("error dialing {address} from bastion: {e}"),
            )
        })?;

    let handler = ClientHandler::new(HostRole::Remote, address.clone(), policy.clone());
    let mut handle = client::connect_stream(transport_config(), channel.into_stream(), handler)
        .await
        .map_err(|e| {
            ExecError::connection(
                HostRole::Remote,
                &address,
                format!("error establishing session through bastion: {e}"),
            )
        })?;

    if let Err(reason) = authenticate(&mut handle, target_config).await {
        let _ = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        return Err(ExecError::connection(
            HostRole::Remote,
            &address,
            format!("authentication failed: {reason}"),
        ));
    }

    Ok(SshClient::new(HostRole::Remote, address, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::build_client_config;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_unreachable_bastion_is_named() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let bastion = ConnectionDescriptor::new("127.0.0.1")
            .with_port(port)
            .with_user("ops")
            .with_password("pw");
        let target = ConnectionDescriptor::new("10.0.0.2")
            .with_user("root")
            .with_password("pw");
        let bastion_config =
            build_client_config(HostRole::Bastion, Some("ops"), Some("pw"), None).unwrap();
        let target_config =
            build_client_config(HostRole::Remote, Some("root"), Some("pw"), None).unwrap();

        let err = connect_via_bastion(
            &bastion,
            &bastion_config,
            &target,
            &target_config,
            &HostKeyPolicy::AcceptAny,
        )
        .await
        .unwrap_err();

        match err {
            ExecError::Connection { role, host, .. } => {
                assert_eq!(role, HostRole::Bastion);
                assert_eq!(host, format!("127.0.0.1:{port}"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
