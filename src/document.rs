//! Structured directory documents and their text-format parsers.
//!
//! Only the fields the index and the descriptor table need are extracted;
//! every other keyword line is skipped.

use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use chrono::{DateTime, Utc};

use crate::{
    error::{Error, Result},
    flags::FlagSet,
    timestamp,
};

/// Length of a hex-encoded relay fingerprint.
pub const FINGERPRINT_LEN: usize = 40;

/// A network-status consensus document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusDocument {
    pub valid_after: DateTime<Utc>,
    pub fresh_until: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub routers: Vec<RouterStatus>,
}

/// One router's entry in a consensus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStatus {
    pub nickname: String,
    /// Uppercase hex identity fingerprint.
    pub fingerprint: String,
    /// Uppercase hex digest of the router's descriptor. Empty when the
    /// consensus flavour carries none.
    pub digest: String,
    pub published: DateTime<Utc>,
    pub address: String,
    pub or_port: u16,
    pub dir_port: u16,
    pub flags: FlagSet,
    pub version_line: Option<String>,
    pub bandwidth: Option<i64>,
    pub measured: Option<i64>,
    pub is_unmeasured: bool,
}

/// A relay or bridge server descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub nickname: String,
    pub fingerprint: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub address: String,
    pub or_port: u16,
    pub dir_port: u16,
    pub platform: Option<String>,
    pub uptime: Option<i64>,
    pub contact: Option<Vec<u8>>,
    pub exit_policy: Vec<String>,
    pub average_bandwidth: Option<i64>,
    pub burst_bandwidth: Option<i64>,
    pub observed_bandwidth: Option<i64>,
    pub hibernating: bool,
    pub extra_info_digest: Option<String>,
    pub is_bridge: bool,
}

/// Parse a consensus document.
pub fn parse_consensus(text: &str) -> Result<ConsensusDocument> {
    let mut valid_after = None;
    let mut fresh_until = None;
    let mut valid_until = None;
    let mut routers: Vec<RouterStatus> = Vec::new();
    let mut last_line = 1;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let line = raw.trim_end();
        if line.starts_with('@') || line.is_empty() {
            continue;
        }
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        match keyword {
            "valid-after" => valid_after = Some(header_time(rest, line_no)?),
            "fresh-until" => fresh_until = Some(header_time(rest, line_no)?),
            "valid-until" => valid_until = Some(header_time(rest, line_no)?),
            "r" => routers.push(parse_router_line(rest, line_no)?),
            "s" => {
                if let Some(router) = routers.last_mut() {
                    router.flags = FlagSet::from_names(rest.split_whitespace());
                }
            }
            "v" => {
                if let Some(router) = routers.last_mut() {
                    router.version_line = Some(rest.to_string());
                }
            }
            "w" => {
                if let Some(router) = routers.last_mut() {
                    apply_weight_line(router, rest);
                }
            }
            "directory-footer" => break,
            _ => {}
        }
    }

    let missing =
        |name: &str| Error::parse(last_line, format!("missing {name} line"));
    Ok(ConsensusDocument {
        valid_after: valid_after.ok_or_else(|| missing("valid-after"))?,
        fresh_until: fresh_until.ok_or_else(|| missing("fresh-until"))?,
        valid_until: valid_until.ok_or_else(|| missing("valid-until"))?,
        routers,
    })
}

fn header_time(value: &str, line: usize) -> Result<DateTime<Utc>> {
    timestamp::parse_document_time(value)
        .ok_or_else(|| Error::parse(line, format!("bad timestamp {value:?}")))
}

/// `r nickname identity [digest] date time address or_port dir_port`
fn parse_router_line(rest: &str, line: usize) -> Result<RouterStatus> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let (nickname, identity, digest, tail) = match parts.len() {
        8 => (parts[0], parts[1], Some(parts[2]), &parts[3..]),
        7 => (parts[0], parts[1], None, &parts[2..]),
        n => {
            return Err(Error::parse(
                line,
                format!("router line has {n} fields"),
            ));
        }
    };

    let published = timestamp::parse_document_time(&format!(
        "{} {}",
        tail[0], tail[1]
    ))
    .ok_or_else(|| Error::parse(line, "bad publication time"))?;

    Ok(RouterStatus {
        nickname: nickname.to_string(),
        fingerprint: decode_base64_hex(identity)
            .ok_or_else(|| Error::parse(line, "bad identity encoding"))?,
        digest: match digest {
            Some(d) => decode_base64_hex(d)
                .ok_or_else(|| Error::parse(line, "bad digest encoding"))?,
            None => String::new(),
        },
        published,
        address: tail[2].to_string(),
        or_port: parse_port(tail[3], line)?,
        dir_port: parse_port(tail[4], line)?,
        flags: FlagSet::default(),
        version_line: None,
        bandwidth: None,
        measured: None,
        is_unmeasured: false,
    })
}

fn apply_weight_line(router: &mut RouterStatus, rest: &str) {
    for pair in rest.split_whitespace() {
        match pair.split_once('=') {
            Some(("Bandwidth", v)) => router.bandwidth = v.parse().ok(),
            Some(("Measured", v)) => router.measured = v.parse().ok(),
            Some(("Unmeasured", v)) => router.is_unmeasured = v == "1",
            _ => {}
        }
    }
}

fn parse_port(value: &str, line: usize) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::parse(line, format!("bad port {value:?}")))
}

/// Decode an unpadded base64 value into uppercase hex.
fn decode_base64_hex(value: &str) -> Option<String> {
    STANDARD_NO_PAD
        .decode(value.trim_end_matches('='))
        .ok()
        .map(hex::encode_upper)
}

/// Parse every server descriptor contained in `text`.
///
/// Archive files normally hold a single descriptor, but concatenated files
/// are accepted too.
pub fn parse_server_descriptors(text: &str) -> Result<Vec<ServerDescriptor>> {
    let is_bridge = text
        .lines()
        .take_while(|l| l.starts_with('@'))
        .any(|l| l.starts_with("@type bridge-server-descriptor"));

    let mut descriptors = Vec::new();
    let mut current: Option<ServerDescriptor> = None;
    let mut in_signature = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();
        if in_signature {
            in_signature = !line.starts_with("-----END");
            continue;
        }
        if line.starts_with("-----BEGIN") {
            in_signature = true;
            continue;
        }
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        if keyword == "router" {
            if let Some(done) = current.take() {
                descriptors.push(done);
            }
            current = Some(parse_descriptor_router(rest, line_no, is_bridge)?);
            continue;
        }
        let Some(desc) = current.as_mut() else {
            continue;
        };
        match keyword {
            "platform" => desc.platform = Some(rest.to_string()),
            "published" => {
                desc.published = Some(header_time(rest, line_no)?);
            }
            "fingerprint" => {
                let fp: String = rest.split_whitespace().collect();
                desc.fingerprint = Some(fp.to_ascii_uppercase());
            }
            "uptime" => desc.uptime = rest.trim().parse().ok(),
            "bandwidth" => {
                let mut values = rest.split_whitespace().map(|v| v.parse().ok());
                desc.average_bandwidth = values.next().flatten();
                desc.burst_bandwidth = values.next().flatten();
                desc.observed_bandwidth = values.next().flatten();
            }
            "extra-info-digest" => {
                desc.extra_info_digest =
                    rest.split_whitespace().next().map(str::to_string);
            }
            "hibernating" => desc.hibernating = rest.trim() == "1",
            "contact" => desc.contact = Some(rest.as_bytes().to_vec()),
            "accept" | "reject" => desc.exit_policy.push(line.to_string()),
            _ => {}
        }
    }
    if let Some(done) = current {
        descriptors.push(done);
    }
    Ok(descriptors)
}

/// `router nickname address or_port socks_port dir_port`
fn parse_descriptor_router(
    rest: &str,
    line: usize,
    is_bridge: bool,
) -> Result<ServerDescriptor> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(Error::parse(
            line,
            format!("router line has {} fields", parts.len()),
        ));
    }
    Ok(ServerDescriptor {
        nickname: parts[0].to_string(),
        fingerprint: None,
        published: None,
        address: parts[1].to_string(),
        or_port: parse_port(parts[2], line)?,
        dir_port: parse_port(parts[4], line)?,
        platform: None,
        uptime: None,
        contact: None,
        exit_policy: Vec::new(),
        average_bandwidth: None,
        burst_bandwidth: None,
        observed_bandwidth: None,
        hibernating: false,
        extra_info_digest: None,
        is_bridge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::RelayFlag;

    const CONSENSUS: &str = "\
@type network-status-consensus-3 1.0
network-status-version 3
vote-status consensus
valid-after 2013-04-01 05:00:00
fresh-until 2013-04-01 06:00:00
valid-until 2013-04-01 08:00:00
known-flags Authority BadExit Exit Fast Guard HSDir Named Running Stable Unnamed V2Dir Valid
r moria1 lpXfw1/+uGEym58asExGOXAgzjE IpcU7dolas8+Q+oAzwgvZIWx7PA 2013-04-01 03:21:48 128.31.0.34 9101 9131
s Authority Fast Named Running Stable V2Dir Valid
v Tor 0.2.4.11-alpha-dev
w Bandwidth=20 Unmeasured=1
p reject 1-65535
r Unnamed AAoQ1DAR6kkoo19hBAX5K0QztNw TBXvHZGnKTpU3mbHn5UZ0Hds1FA 2013-04-01 02:11:03 85.214.94.170 443 0
s Exit Fast Running Valid NoEdConsensus
w Bandwidth=1500 Measured=1200
directory-footer
bandwidth-weights Wbd=0
";

    #[test]
    fn parses_consensus_header_and_routers() {
        let doc = parse_consensus(CONSENSUS).unwrap();
        assert_eq!(timestamp::format(&doc.valid_after), "2013-04-01 05:00:00");
        assert_eq!(timestamp::format(&doc.valid_until), "2013-04-01 08:00:00");
        assert_eq!(doc.routers.len(), 2);

        let moria = &doc.routers[0];
        assert_eq!(moria.nickname, "moria1");
        assert_eq!(
            moria.fingerprint,
            "9695DFC35FFEB861329B9F1AB04C46397020CE31"
        );
        assert_eq!(moria.fingerprint.len(), FINGERPRINT_LEN);
        assert_eq!(moria.digest.len(), FINGERPRINT_LEN);
        assert_eq!(moria.or_port, 9101);
        assert_eq!(moria.dir_port, 9131);
        assert!(moria.flags.contains(RelayFlag::Authority));
        assert!(!moria.flags.contains(RelayFlag::Exit));
        assert_eq!(
            moria.version_line.as_deref(),
            Some("Tor 0.2.4.11-alpha-dev")
        );
        assert!(moria.is_unmeasured);

        let unnamed = &doc.routers[1];
        assert!(unnamed.flags.contains(RelayFlag::Exit));
        assert_eq!(unnamed.measured, Some(1200));
        assert_eq!(unnamed.dir_port, 0);
    }

    #[test]
    fn missing_validity_is_an_error() {
        let err = parse_consensus("network-status-version 3\n").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));

        let text = "valid-after 2013-04-01 05:00:00\n\
                    fresh-until 2013-04-01 06:00:00\n\
                    directory-footer\n\
                    valid-until 2013-04-01 08:00:00\n";
        match parse_consensus(text).unwrap_err() {
            Error::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("valid-until"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_router_line_reports_line_number() {
        let text = "valid-after 2013-04-01 05:00:00\nr short line\n";
        match parse_consensus(text).unwrap_err() {
            Error::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parses_server_descriptor() {
        let text = "\
@type server-descriptor 1.0
router moria1 128.31.0.34 9101 0 9131
platform Tor 0.2.4.11-alpha-dev on Linux
published 2013-04-01 03:21:48
fingerprint 9695 DFC3 5FFE B861 329B 9F1A B04C 4639 7020 CE31
uptime 1234
bandwidth 512000 1024000 400000
extra-info-digest 0123456789ABCDEF0123456789ABCDEF01234567
hibernating 1
contact 1024D/28988BF5 arma mit edu
reject *:*
router-signature
-----BEGIN SIGNATURE-----
abc
-----END SIGNATURE-----
";
        let descs = parse_server_descriptors(text).unwrap();
        assert_eq!(descs.len(), 1);
        let d = &descs[0];
        assert_eq!(d.nickname, "moria1");
        assert_eq!(
            d.fingerprint.as_deref(),
            Some("9695DFC35FFEB861329B9F1AB04C46397020CE31")
        );
        assert_eq!(d.dir_port, 9131);
        assert_eq!(d.observed_bandwidth, Some(400000));
        assert!(d.hibernating);
        assert!(!d.is_bridge);
        assert_eq!(d.exit_policy, vec!["reject *:*".to_string()]);
    }

    #[test]
    fn bridge_annotation_marks_descriptors() {
        let text = "@type bridge-server-descriptor 1.0\n\
                    router b1 10.0.0.1 443 0 0\n\
                    router b2 10.0.0.2 443 0 0\n";
        let descs = parse_server_descriptors(text).unwrap();
        assert_eq!(descs.len(), 2);
        assert!(descs.iter().all(|d| d.is_bridge));
    }
}
