use anyhow::{bail, Context, Result};
use axum::body::Body;
use axum::extract::Request;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::{open_store, proxy_stack};
use crate::cli::FetchArgs;
use crate::proxy::FetchProxy;

pub async fn execute_fetch(registry: Option<&std::path::Path>, args: FetchArgs) -> Result<()> {
    let (resolver, client) = proxy_stack(open_store(registry)?)?;
    let proxy = FetchProxy::new(resolver, client);

    let path = if args.path.starts_with('/') {
        args.path.clone()
    } else {
        format!("/{}", args.path)
    };

    let mut builder = Request::builder()
        .method(args.method.to_uppercase().as_str())
        .uri(format!("http://{}{}", args.service, path));
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("Header must be 'name: value', got: {}", header);
        };
        builder = builder.header(name.trim(), value.trim());
    }
    let body = args.data.map(Body::from).unwrap_or_else(Body::empty);
    let request = builder.body(body).context("Invalid request")?;

    let response = proxy
        .fetch(&args.service, args.entrypoint.as_deref(), request)
        .await?;
    let status = response.status();
    eprintln!("HTTP {}", status);

    let mut stdout = tokio::io::stdout();
    let mut stream = response.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;

    if !status.is_success() {
        bail!("Request failed with {}", status);
    }
    Ok(())
}
