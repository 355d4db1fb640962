use crate::query::Query;
use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Deserialize;
use url::Url;

const CMR_GRANULE_API: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";
const PAGE_SIZE: u32 = 2000;

/// One discoverable remote granule, as summarized by the CMR metadata search.
#[derive(Debug, Clone, Deserialize)]
pub struct Granule {
    pub id: String,
    pub producer_granule_id: String,
    pub time_start: Option<String>,
    granule_size: Option<String>,
}

#[derive(Deserialize)]
struct Feed {
    #[serde(default)]
    entry: Vec<Granule>,
}

#[derive(Deserialize)]
struct SearchResponse {
    feed: Feed,
}

/// Orbit metadata encoded in a producer granule id,
/// e.g. `ATL06_20200103073653_01160605_006_01.h5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrbitInfo {
    pub rgt: u16,
    pub cycle: u8,
    pub orbit_segment: u8,
}

impl Granule {
    pub fn size_mb(&self) -> Option<f64> {
        self.granule_size.as_deref()?.parse().ok()
    }

    pub fn orbit(&self) -> Option<OrbitInfo> {
        let re = Regex::new(
            r"ATL\d{2}(?:-\d{2})?_\d{14}_(?<rgt>\d{4})(?<cycle>\d{2})(?<segment>\d{2})_\d{3}_\d{2}\.h5$",
        )
        .expect("Regex pattern should always compile");
        let captures = re.captures(&self.producer_granule_id)?;
        Some(OrbitInfo {
            rgt: captures["rgt"].parse().ok()?,
            cycle: captures["cycle"].parse().ok()?,
            orbit_segment: captures["segment"].parse().ok()?,
        })
    }
}

/// Count and total download size of a search result.
#[derive(Debug, Clone, Copy)]
pub struct GranuleSummary {
    pub count: usize,
    pub total_size_mb: f64,
}

/// Enumerate the granules matching the query, paging through the archive's
/// result set until it is exhausted. Outbound metadata searches only, no
/// side effects, no retry.
pub async fn avail_granules(query: &Query) -> Result<Vec<Granule>> {
    let params = query.cmr_params()?;
    let client = reqwest::Client::new();

    let mut granules: Vec<Granule> = vec![];
    let mut page_num: u32 = 1;
    loop {
        let mut url = Url::parse_with_params(CMR_GRANULE_API, &params)?;
        url.query_pairs_mut()
            .append_pair("page_size", &PAGE_SIZE.to_string())
            .append_pair("page_num", &page_num.to_string());

        let response = client.get(url).send().await?.error_for_status()?;
        let hits = cmr_hits(response.headers());
        let page: SearchResponse = response.json().await?;

        let page_len = page.feed.entry.len();
        granules.extend(page.feed.entry);

        match advance(hits, granules.len(), page_len)? {
            Paging::Done => break,
            Paging::Continue => page_num += 1,
        }
    }
    Ok(granules)
}

#[derive(Debug, PartialEq, Eq)]
enum Paging {
    Continue,
    Done,
}

/// Decide whether another page must be fetched. The archive reports the
/// total match count in its `CMR-Hits` header; a short page before that
/// total is reached means the enumeration would be truncated.
fn advance(hits: Option<usize>, fetched: usize, page_len: usize) -> Result<Paging> {
    let done = match hits {
        Some(hits) => fetched >= hits,
        None => page_len < PAGE_SIZE as usize,
    };
    if done {
        return Ok(Paging::Done);
    }
    if page_len == 0 {
        return Err(anyhow!(
            "archive reported {} matching granules but delivered {}",
            hits.unwrap_or(0),
            fetched
        ));
    }
    Ok(Paging::Continue)
}

fn cmr_hits(headers: &reqwest::header::HeaderMap) -> Option<usize> {
    headers.get("CMR-Hits")?.to_str().ok()?.parse().ok()
}

pub fn summarize(granules: &[Granule]) -> GranuleSummary {
    GranuleSummary {
        count: granules.len(),
        total_size_mb: granules.iter().filter_map(|g| g.size_mb()).sum(),
    }
}

pub fn granule_ids(granules: &[Granule]) -> Vec<String> {
    granules
        .iter()
        .map(|g| g.producer_granule_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RESPONSE: &str = r#"{
        "feed": {
            "entry": [
                {
                    "id": "G1234567890-NSIDC_ECS",
                    "producer_granule_id": "ATL06_20200103073653_01160605_006_01.h5",
                    "time_start": "2020-01-03T07:36:53.000Z",
                    "granule_size": "27.25"
                },
                {
                    "id": "G1234567891-NSIDC_ECS",
                    "producer_granule_id": "ATL06_20200107072213_01770605_006_01.h5",
                    "time_start": "2020-01-07T07:22:13.000Z",
                    "granule_size": "12.75"
                }
            ]
        }
    }"#;

    fn sample_granules() -> Vec<Granule> {
        let response: SearchResponse = serde_json::from_str(SAMPLE_RESPONSE).unwrap();
        response.feed.entry
    }

    #[test]
    fn test_parse_search_response() {
        let granules = sample_granules();
        assert_eq!(granules.len(), 2);
        assert_eq!(granules[0].id, "G1234567890-NSIDC_ECS");
        assert_eq!(granules[1].size_mb(), Some(12.75));
    }

    #[test]
    fn test_parse_empty_response() {
        let response: SearchResponse = serde_json::from_str(r#"{"feed": {}}"#).unwrap();
        assert!(response.feed.entry.is_empty());
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&sample_granules());
        assert_eq!(summary.count, 2);
        assert_eq!(summary.total_size_mb, 40.0);
    }

    #[test]
    fn test_orbit_from_producer_id() {
        let granules = sample_granules();
        let orbit = granules[0].orbit().unwrap();
        assert_eq!(
            orbit,
            OrbitInfo {
                rgt: 116,
                cycle: 6,
                orbit_segment: 5
            }
        );
    }

    #[test]
    fn test_granule_ids() {
        let ids = granule_ids(&sample_granules());
        assert_eq!(ids[0], "ATL06_20200103073653_01160605_006_01.h5");
    }

    #[test]
    fn test_advance_pages_until_hits_reached() {
        let page = PAGE_SIZE as usize;
        assert_eq!(
            advance(Some(2 * page + 100), page, page).unwrap(),
            Paging::Continue
        );
        assert_eq!(
            advance(Some(2 * page + 100), 2 * page, page).unwrap(),
            Paging::Continue
        );
        assert_eq!(
            advance(Some(2 * page + 100), 2 * page + 100, 100).unwrap(),
            Paging::Done
        );
    }

    #[test]
    fn test_advance_errors_on_truncated_enumeration() {
        // Archive claims more matches than it delivers; an empty page before
        // the reported total must not pass silently.
        assert!(advance(Some(5000), 2000, 0).is_err());
    }

    #[test]
    fn test_advance_without_hits_header() {
        let page = PAGE_SIZE as usize;
        assert_eq!(advance(None, page, page).unwrap(), Paging::Continue);
        assert_eq!(advance(None, page + 40, 40).unwrap(), Paging::Done);
    }

    #[test]
    fn test_cmr_hits_header() {
        use reqwest::header::{HeaderMap, HeaderValue};

        let mut headers = HeaderMap::new();
        assert_eq!(cmr_hits(&headers), None);

        headers.insert("CMR-Hits", HeaderValue::from_static("4100"));
        assert_eq!(cmr_hits(&headers), Some(4100));
    }
}
