use crate::download::ArchiveOps;
use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::header::RANGE;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::io::{BufRead, Write};

const URS_HOST: &str = "urs.earthdata.nasa.gov";
const URS_TOKEN_API: &str = "https://urs.earthdata.nasa.gov/api/users/token";

/// An authenticated Earthdata session. Returned by [`Session::login`] and
/// threaded explicitly into every call that orders or downloads granules;
/// one session exists per run.
pub struct Session {
    client: Client,
    token: String,
    email: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl Session {
    /// Log in against Earthdata with the given user id. The password comes
    /// from `~/.netrc` when an entry for the archive host exists, otherwise
    /// from an interactive prompt. The prompt does not disable terminal
    /// echo; keep credentials in `~/.netrc` on shared terminals.
    pub async fn login(uid: &str, email: &str) -> Result<Self> {
        let password = match netrc_password(uid) {
            Some(password) => password,
            None => prompt_password(uid)?,
        };

        let client = Client::new();
        let response: TokenResponse = client
            .post(URS_TOKEN_API)
            .basic_auth(uid, Some(&password))
            .send()
            .await?
            .error_for_status()
            .context("Earthdata login rejected")?
            .json()
            .await?;
        debug!("obtained Earthdata token for {uid}");

        Ok(Self {
            client,
            token: response.access_token,
            email: email.to_string(),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).bearer_auth(&self.token)
    }
}

impl ArchiveOps for Session {
    async fn content_length(self: &Self, url: &str) -> Result<u64> {
        let response = self
            .client
            .head(url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        response
            .content_length()
            .ok_or(anyhow!("Error reading size of remote object"))
    }

    async fn get_range(self: &Self, url: &str, start_byte: u64) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(RANGE, format!("bytes={start_byte}-"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }
}

fn netrc_password(uid: &str) -> Option<String> {
    let path = dirs::home_dir()?.join(".netrc");
    let content = std::fs::read_to_string(path).ok()?;
    parse_netrc(&content, uid)
}

fn parse_netrc(content: &str, uid: &str) -> Option<String> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let mut machine_matches = false;
    let mut login_matches = false;
    for pair in tokens.windows(2) {
        match pair[0] {
            "machine" => {
                machine_matches = pair[1] == URS_HOST;
                login_matches = false;
            }
            "login" if machine_matches => login_matches = pair[1] == uid,
            "password" if machine_matches && login_matches => {
                return Some(pair[1].to_string());
            }
            _ => {}
        }
    }
    None
}

// Echoes the typed password; the netrc path is the non-echoing option.
fn prompt_password(uid: &str) -> Result<String> {
    print!("Earthdata password for {uid}: ");
    std::io::stdout().flush()?;
    let mut password = String::new();
    std::io::stdin().lock().read_line(&mut password)?;
    Ok(password.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETRC: &str = "machine some.other.host login jane password nope\n\
        machine urs.earthdata.nasa.gov login jane password s3cret\n";

    #[test]
    fn test_parse_netrc() {
        assert_eq!(parse_netrc(NETRC, "jane"), Some("s3cret".to_string()));
    }

    #[test]
    fn test_parse_netrc_wrong_login() {
        assert_eq!(parse_netrc(NETRC, "john"), None);
    }

    #[test]
    fn test_parse_netrc_wrong_host() {
        let content = "machine some.other.host login jane password nope";
        assert_eq!(parse_netrc(content, "jane"), None);
    }
}
