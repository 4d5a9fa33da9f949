//! Client configuration parsed from a connection string.

use std::{str::FromStr, time::Duration};

use crate::{
    cmap::{Credential, PoolSettings, ServerAddress},
    error::{Error, Result},
    raw::BsonWriterSettings,
};

const SCHEME: &str = "mongodb://";

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Seed list of servers.
    pub hosts: Vec<ServerAddress>,
    /// The database named in the connection string path.
    pub database: Option<String>,
    /// Settings shared by every server's connection pool.
    pub pool: PoolSettings,
    /// How long an operation waits for a suitable server.
    pub server_selection_timeout: Duration,
    /// Timeout for opening a connection.
    pub connect_timeout: Duration,
    /// Credential applied to every connection.
    pub credential: Option<Credential>,
    /// Reject element names starting with `$` or containing `.` in written documents.
    pub check_element_names: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            hosts: vec![ServerAddress::default()],
            database: None,
            pool: PoolSettings::default(),
            server_selection_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            credential: None,
            check_element_names: true,
        }
    }
}

impl ClientSettings {
    /// Parses `mongodb://[user:pass@]host[:port][,host...]/[db][?options]`.
    ///
    /// Option names are case-insensitive. Unknown options are rejected.
    pub fn parse(uri: impl AsRef<str>) -> Result<Self> {
        let uri = uri.as_ref();
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::invalid_argument(format!("connection string must start with \"{SCHEME}\"")))?;

        let (authority, path) = match rest.find(['/', '?']) {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };

        let (user_info, hosts) = match authority.rsplit_once('@') {
            Some((user_info, hosts)) => (Some(user_info), hosts),
            None => (None, authority),
        };

        let mut settings = Self {
            hosts: hosts
                .split(',')
                .map(ServerAddress::parse)
                .collect::<Result<_>>()?,
            ..Self::default()
        };

        let database = path.trim_start_matches('/');
        if !database.is_empty() {
            settings.database = Some(percent_decode(database)?);
        }

        let mut auth_source = None;
        let mut wait_queue_size = None;
        let mut wait_queue_multiple = None;
        for pair in query.into_iter().flat_map(|q| q.split(['&', ';'])) {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                Error::invalid_argument(format!("connection string option \"{pair}\" has no value"))
            })?;
            let value = percent_decode(value)?;

            match name.to_ascii_lowercase().as_str() {
                "minpoolsize" => settings.pool.min_size = parse_number(name, &value)?,
                "maxpoolsize" => settings.pool.max_size = parse_number(name, &value)?,
                "waitqueuesize" => wait_queue_size = Some(parse_number(name, &value)?),
                "waitqueuemultiple" => {
                    wait_queue_multiple = Some(value.parse::<f64>().map_err(|_| {
                        Error::invalid_argument(format!("invalid value \"{value}\" for {name}"))
                    })?)
                }
                "waitqueuetimeoutms" => {
                    settings.pool.wait_queue_timeout = parse_millis(name, &value)?
                }
                "maxidletimems" => settings.pool.max_idle_time = parse_millis(name, &value)?,
                "maxlifetimems" => {
                    settings.pool.max_connection_lifetime = parse_millis(name, &value)?
                }
                "connecttimeoutms" => settings.connect_timeout = parse_millis(name, &value)?,
                "serverselectiontimeoutms" => {
                    settings.server_selection_timeout = parse_millis(name, &value)?
                }
                "authsource" => auth_source = Some(value),
                _ => {
                    return Err(Error::invalid_argument(format!(
                        "unknown connection string option \"{name}\""
                    )));
                }
            }
        }

        settings.pool.wait_queue_size = match (wait_queue_size, wait_queue_multiple) {
            (Some(size), _) => size,
            (None, Some(multiple)) => (multiple * settings.pool.max_size as f64) as usize,
            (None, None) => settings.pool.wait_queue_size,
        };
        settings.pool.validate()?;

        if let Some(user_info) = user_info {
            let (username, password) = user_info.split_once(':').unwrap_or((user_info, ""));
            let source = auth_source
                .or_else(|| settings.database.clone())
                .unwrap_or_else(|| "admin".to_string());
            settings.credential = Some(Credential::new(
                source,
                percent_decode(username)?,
                percent_decode(password)?,
            ));
        }

        Ok(settings)
    }

    /// Writer settings matching these client settings.
    pub fn writer_settings(&self) -> BsonWriterSettings {
        BsonWriterSettings {
            check_element_names: self.check_element_names,
            ..BsonWriterSettings::default()
        }
    }
}

impl FromStr for ClientSettings {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_number(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| Error::invalid_argument(format!("invalid value \"{value}\" for {name}")))
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    parse_number(name, value).map(|ms| Duration::from_millis(ms as u64))
}

fn percent_decode(input: &str) -> Result<String> {
    let mut bytes = Vec::with_capacity(input.len());
    let mut iter = input.bytes();
    while let Some(b) = iter.next() {
        if b != b'%' {
            bytes.push(b);
            continue;
        }
        let hex = [iter.next(), iter.next()];
        let decoded = match hex {
            [Some(hi), Some(lo)] => hex::decode([hi, lo]).ok(),
            _ => None,
        };
        match decoded.as_deref() {
            Some([byte]) => bytes.push(*byte),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid percent-encoding in \"{input}\""
                )));
            }
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| Error::invalid_argument(format!("invalid UTF-8 in \"{input}\"")))
}
