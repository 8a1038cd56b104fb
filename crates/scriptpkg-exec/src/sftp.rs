//! Local-to-remote file copy over the SFTP subsystem

use std::path::Path;

use russh_sftp::client::SftpSession;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::ssh::SshClient;

/// Bytes moved per read/write round
pub const TRANSFER_CHUNK_SIZE: usize = 32 * 1024;

/// Copy `reader` into `writer` in fixed-size chunks until a zero-length read
///
/// # Errors
/// Returns the first I/O error from either side
pub async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        total += n as u64;
    }

    writer.flush().await?;
    Ok(total)
}

/// Create `remote` on the client's host and stream `local` into it
///
/// No resume and no checksum: the destination is written once per run.
#[instrument(skip(client), fields(host = %client.address()))]
pub(crate) async fn upload(client: &SshClient, local: &Path, remote: &str) -> Result<u64, ExecError> {
    let transfer_error = |reason: String| ExecError::Transfer {
        host: client.address().to_string(),
        reason,
    };

    let mut source = tokio::fs::File::open(local)
        .await
        .map_err(|e| transfer_error(format!("error opening local script: {e}")))?;

    let channel = client
        .open_channel()
        .await
        .map_err(|e| transfer_error(format!("error creating sftp client: {e}")))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| transfer_error(format!("error creating sftp client: {e}")))?;
    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| transfer_error(format!("error creating sftp client: {e}")))?;

    let result = async {
        let mut destination = sftp.create(remote).await.map_err(|e| {
            transfer_error(format!("error creating destination file on remote host: {e}"))
        })?;
        let written = copy_chunked(&mut source, &mut destination, TRANSFER_CHUNK_SIZE)
            .await
            .map_err(|e| transfer_error(format!("error writing {remote}: {e}")))?;
        destination
            .shutdown()
            .await
            .map_err(|e| transfer_error(format!("error closing {remote}: {e}")))?;
        Ok::<_, ExecError>(written)
    }
    .await;

    if let Err(e) = sftp.close().await {
        debug!(error = %e, "sftp session close failed");
    }

    if let Ok(written) = &result {
        debug!(bytes = written, remote, "file transferred");
    }
    result
}
