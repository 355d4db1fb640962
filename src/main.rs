use anyhow::Result;
use icepull::auth::Session;
use icepull::order::{self, OrderOptions};
use icepull::query::{Query, SpatialExtent};
use icepull::reader::GranuleReader;
use icepull::variables::{self, VariableSelection};
use icepull::{export, search};
use log::{debug, info};
use std::path::PathBuf;

// Run parameters, edited in place before each run.
const SHORT_NAME: &str = "ATL06";
const DATE_RANGE: [&str; 2] = ["2020-01-01", "2020-02-28"];
const EARTHDATA_UID: &str = "enter Earthdata username";
const EMAIL: &str = "enter email";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let download_dir = PathBuf::from("./downloads");
    let output_dir = PathBuf::from("./outputs");
    std::fs::create_dir_all(&output_dir)?;

    let extent = SpatialExtent::BoundingBox {
        bbox: [36.02, -78.25, 41.98, -76.97],
    };
    let query = Query::new(SHORT_NAME, extent, DATE_RANGE)?;
    info!("product {} version {}", query.short_name(), query.version());
    query.write(output_dir.join("query.toml"))?;

    let granules = search::avail_granules(&query).await?;
    let summary = search::summarize(&granules);
    info!(
        "{} granules available ({:.1} MB total)",
        summary.count, summary.total_size_mb
    );
    for id in search::granule_ids(&granules) {
        debug!("available granule: {id}");
    }

    let session = Session::login(EARTHDATA_UID, EMAIL).await?;

    let available = variables::avail(&session, query.short_name(), query.version()).await?;
    info!("{} subsettable variables", available.len());

    // Coordinate, quality and geophysical variables are requested in
    // separate batches so the order stays auditable.
    let mut selection = VariableSelection::new();
    selection.append(true, &["latitude", "longitude"]);
    selection.append(true, &["atl06_quality_summary", "cycle_number", "rgt", "sc_orient"]);
    selection.append(true, &["h_li", "h_li_sigma", "sigma_geo_h"]);
    selection.append(true, &["start_geoseg", "end_geoseg"]);
    selection.append(true, &["dh_fit_dx", "dh_fit_dy", "dh_fit_dx_sigma"]);
    let wanted = selection.finalize();
    debug!("requested variables: {:?}", wanted.names());

    let options = OrderOptions {
        subset: true,
        email: true,
        ..Default::default()
    };
    let order_ids = order::order_granules(&session, &query, &wanted, &options).await?;
    let files = order::download_granules(&session, &order_ids, &download_dir).await?;
    info!("{} granule files downloaded", files.len());

    let mut reader = GranuleReader::new(&download_dir, SHORT_NAME)?;
    reader.vars_mut().append(
        false,
        &[
            "h_li",
            "latitude",
            "longitude",
            "atl06_quality_summary",
            "cycle_number",
            "rgt",
        ],
    );
    let table = reader.load()?;
    info!(
        "merged table: {} rows x {} columns",
        table.rows(),
        table.column_names().len()
    );

    let shp = export::write_shapefile(&table, &output_dir, "atl06_points")?;
    info!("wrote {}", shp.display());

    Ok(())
}
