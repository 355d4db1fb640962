use crate::auth::Session;
use crate::download::{DownloadPlan, DownloadTask};
use crate::error::GranuleError;
use crate::query::Query;
use crate::variables::VariableList;
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

const EGI_REQUEST_API: &str = "https://n5eil02u.ecs.nsidc.org/egi/request";
const ORDER_RESULT_API: &str = "https://n5eil02u.ecs.nsidc.org/esir";

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Knobs of one order request.
#[derive(Debug, Clone)]
pub struct OrderOptions {
    /// Apply the spatial/temporal/variable subset server-side. When off, the
    /// archive delivers native granules.
    pub subset: bool,
    /// Have the archive mail a completion notice to the session's address.
    pub email: bool,
    /// Granules bundled per zipped order.
    pub page_size: u32,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            subset: true,
            email: false,
            page_size: 2000,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum OrderStatus {
    Pending,
    Complete,
    CompleteWithErrors,
    Failed,
}

/// Submit a subset/order request for everything the query matches. Returns
/// the order ids once the archive has accepted the request.
pub async fn order_granules(
    session: &Session,
    query: &Query,
    variables: &VariableList,
    options: &OrderOptions,
) -> Result<Vec<String>> {
    let mut params = query.cmr_params()?;
    params.push(("request_mode".to_string(), "async".to_string()));
    params.push(("page_size".to_string(), options.page_size.to_string()));
    if options.email {
        params.push(("email".to_string(), session.email().to_string()));
    }
    if options.subset {
        params.extend(query.subset_params()?);
        params.push(("Coverage".to_string(), variables.coverage()));
    } else {
        // Bypasses the subsetter entirely
        params.push(("agent".to_string(), "NO".to_string()));
    }

    let content = session
        .get(EGI_REQUEST_API)
        .query(&params)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let order_ids = parse_order_ids(&content)?;
    info!("order accepted: {:?}", order_ids);
    Ok(order_ids)
}

/// Block until every order completes, then transfer and unpack the zipped
/// results into `destination`. On success all ordered granule files exist
/// under `destination`.
pub async fn download_granules(
    session: &Session,
    order_ids: &[String],
    destination: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(destination)?;

    let mut tasks: Vec<DownloadTask> = vec![];
    for order_id in order_ids {
        wait_for_order(session, order_id).await?;
        let url = format!("{ORDER_RESULT_API}/{order_id}.zip");
        let output = destination.join(format!("{order_id}.zip"));
        let output = output
            .to_str()
            .ok_or(anyhow!("destination path is not valid UTF-8"))?;
        tasks.push(DownloadTask::new(&url, output));
    }

    let plan = DownloadPlan::new(tasks);
    plan.write(destination.join("download_plan.json"))?;
    plan.execute(session).await?;

    let mut granule_files = vec![];
    for task in plan.tasks() {
        granule_files.extend(extract_archive(task.output(), destination)?);
        std::fs::remove_file(task.output())?;
    }
    Ok(granule_files)
}

async fn wait_for_order(session: &Session, order_id: &str) -> Result<()> {
    loop {
        let url = format!("{EGI_REQUEST_API}/{order_id}");
        let content = session
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let (status, messages) = parse_order_status(&content)?;
        match status {
            OrderStatus::Pending => {
                info!("order {order_id} still processing");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            OrderStatus::Complete => return Ok(()),
            OrderStatus::CompleteWithErrors => {
                for message in &messages {
                    warn!("order {order_id}: {message}");
                }
                return Ok(());
            }
            OrderStatus::Failed => {
                return Err(
                    GranuleError::OrderFailed(order_id.to_string(), messages.join("; ")).into(),
                )
            }
        }
    }
}

fn parse_order_ids(content: &str) -> Result<Vec<String>> {
    let doc = roxmltree::Document::parse(content)?;
    let order_ids = doc
        .descendants()
        .filter(|n| n.has_tag_name("orderId"))
        .filter_map(|n| n.text().map(str::to_string))
        .collect::<Vec<_>>();
    if order_ids.is_empty() {
        return Err(anyhow!("order response contains no order id"));
    }
    Ok(order_ids)
}

fn parse_order_status(content: &str) -> Result<(OrderStatus, Vec<String>)> {
    let doc = roxmltree::Document::parse(content)?;
    let status_text = doc
        .descendants()
        .filter(|n| n.has_tag_name("status"))
        .next()
        .and_then(|n| n.text())
        .ok_or(anyhow!("Unable to locate 'status' tag"))?;

    let status = match status_text {
        "pending" | "processing" => OrderStatus::Pending,
        "complete" => OrderStatus::Complete,
        "complete_with_errors" => OrderStatus::CompleteWithErrors,
        _ => OrderStatus::Failed,
    };

    let messages = doc
        .descendants()
        .filter(|n| n.has_tag_name("message"))
        .filter_map(|n| n.text().map(str::to_string))
        .collect();

    Ok((status, messages))
}

/// Unpack the `.h5` members of an order zip, flattened into `destination`.
fn extract_archive(archive_path: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(File::open(archive_path)?)?;
    let mut extracted = vec![];
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let file_name = Path::new(entry.name())
            .file_name()
            .ok_or(anyhow!("zip entry has no file name"))?
            .to_owned();
        let output = destination.join(file_name);
        let mut file = File::create(&output)?;
        std::io::copy(&mut entry, &mut file)?;
        extracted.push(output);
    }
    Ok(extracted)
}
