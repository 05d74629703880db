//! Subcommand execution

use crate::cli::required;
use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use parcel_client::{
    AbortMultipartUploadInput, CancellationToken, Client, CompleteMultipartUploadInput,
    CreateMultipartUploadInput, DataTransferStatus, DataTransferType, ListMultipartUploadsInput,
    ListPartsInput, PartBody, UploadPartFromFileInput, UploadPartInput, UploadSession,
    UploadedPart,
};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub async fn run(
    client: &Client,
    name: &str,
    matches: &ArgMatches,
    cancel: CancellationToken,
) -> Result<()> {
    match name {
        "create" => create(client, matches, cancel).await,
        "upload-part" => upload_part(client, matches, cancel).await,
        "complete" => complete(client, matches, cancel).await,
        "abort" => abort(client, matches, cancel).await,
        "list-parts" => list_parts(client, matches, cancel).await,
        "list-uploads" => list_uploads(client, matches, cancel).await,
        other => bail!("unknown command '{}'", other),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn session_from(matches: &ArgMatches) -> Result<UploadSession> {
    Ok(UploadSession::resume(
        required(matches, "bucket")?,
        required(matches, "key")?,
        required(matches, "upload-id")?,
    ))
}

fn log_progress(status: &DataTransferStatus) {
    match status.transfer_type {
        DataTransferType::Started => debug!("Sending {} bytes", status.total_bytes),
        DataTransferType::Rw => {}
        DataTransferType::Succeed => debug!("Sent {} bytes", status.consumed_bytes),
        DataTransferType::Failed => debug!(
            "Attempt stopped after {} of {} bytes",
            status.consumed_bytes, status.total_bytes
        ),
    }
}

/// Parts for a completion manifest, read from a JSON array
///
/// Each element needs `part_number` and `etag`; the output of
/// `upload-part` qualifies as is.
pub fn read_parts(path: &Path) -> Result<Vec<UploadedPart>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading parts from {}", path.display()))?;
    let parts: Vec<UploadedPart> = serde_json::from_str(&json)
        .with_context(|| format!("parsing parts in {}", path.display()))?;
    Ok(parts)
}

async fn create(client: &Client, matches: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let input = CreateMultipartUploadInput::new(
        required(matches, "bucket")?,
        required(matches, "key")?,
    )
    .with_cancellation(cancel);
    let output = client.create_multipart_upload(input).await?;

    print_json(&json!({
        "bucket": output.session.bucket(),
        "key": output.session.key(),
        "upload_id": output.upload_id(),
        "encoding_type": output.encoding_type,
        "request_info": output.request_info,
    }))
}

async fn upload_part(
    client: &Client,
    matches: &ArgMatches,
    cancel: CancellationToken,
) -> Result<()> {
    let session = session_from(matches)?;
    let part_number = *matches
        .get_one::<u32>("part-number")
        .context("missing --part-number")?;
    let size = matches.get_one::<u64>("size").copied();

    let output = if matches.get_flag("stdin") {
        let length = size.context("--stdin needs --size")?;
        let mut stdin = tokio::io::stdin();
        let input = UploadPartInput::new(&session, part_number, PartBody::stream(&mut stdin))
            .with_content_length(length)
            .with_listener(Arc::new(log_progress))
            .with_cancellation(cancel);
        client.upload_part(input).await?
    } else {
        let path = matches
            .get_one::<PathBuf>("file")
            .context("missing --file")?;
        let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
        let mut input = UploadPartFromFileInput::new(session.clone(), part_number, path)
            .with_listener(Arc::new(log_progress))
            .with_cancellation(cancel);
        input.offset = offset;
        input.part_size = size;
        client.upload_part_from_file(input).await?
    };

    info!("Uploaded part {} of {}", output.part_number, session.upload_id());
    print_json(&output)
}

async fn complete(client: &Client, matches: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let session = session_from(matches)?;
    let input = if matches.get_flag("all") {
        CompleteMultipartUploadInput::all(&session)
    } else {
        let path = matches
            .get_one::<PathBuf>("parts")
            .context("missing --parts")?;
        CompleteMultipartUploadInput::new(&session, read_parts(path)?)
    };

    let output = client
        .complete_multipart_upload(input.with_cancellation(cancel))
        .await?;
    print_json(&output)
}

async fn abort(client: &Client, matches: &ArgMatches, cancel: CancellationToken) -> Result<()> {
    let session = session_from(matches)?;
    let output = client
        .abort_multipart_upload(AbortMultipartUploadInput::new(&session).with_cancellation(cancel))
        .await?;
    print_json(&output)
}

async fn list_parts(
    client: &Client,
    matches: &ArgMatches,
    cancel: CancellationToken,
) -> Result<()> {
    let session = session_from(matches)?;

    if matches.get_flag("all") {
        let parts = client.list_all_parts(&session, Some(cancel)).await?;
        return print_json(&parts);
    }

    let mut input = ListPartsInput::new(&session).with_cancellation(cancel);
    input.max_parts = matches.get_one::<u32>("max-parts").copied();
    input.part_number_marker = matches.get_one::<u32>("marker").copied();
    let output = client.list_parts(input).await?;
    print_json(&output)
}

async fn list_uploads(
    client: &Client,
    matches: &ArgMatches,
    cancel: CancellationToken,
) -> Result<()> {
    let mut input =
        ListMultipartUploadsInput::new(required(matches, "bucket")?).with_cancellation(cancel);
    input.prefix = matches.get_one::<String>("prefix").cloned();
    input.delimiter = matches.get_one::<String>("delimiter").cloned();
    input.max_uploads = matches.get_one::<u32>("max-uploads").copied();

    if matches.get_flag("all") {
        use futures::TryStreamExt;

        let uploads: Vec<_> = client.multipart_uploads_stream(input).try_collect().await?;
        return print_json(&uploads);
    }

    let output = client.list_multipart_uploads(input).await?;
    print_json(&output)
}
