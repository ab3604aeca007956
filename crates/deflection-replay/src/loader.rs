//! Data loading from forwarding-state files and JSON

use crate::scenario::Scenario;
use crate::{ReplayError, Result};
use deflection_routing::{DeflectionConfig, NextHopOption, NodeId, SimTime};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FSTATE_PREFIX: &str = "fstate_";
const FSTATE_SUFFIX: &str = ".txt";

/// One line of a forwarding-state file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstateEntry {
    pub current: NodeId,
    pub destination: NodeId,
    /// Default hop first, alternatives after it
    pub next_hops: Vec<NextHopOption>,
}

/// `fstate_<t_ns>.txt`
pub fn fstate_file_name(t_ns: i64) -> String {
    format!("{}{}{}", FSTATE_PREFIX, t_ns, FSTATE_SUFFIX)
}

/// Timestamp encoded in a forwarding-state file name
pub fn parse_fstate_time(file_name: &str) -> Option<SimTime> {
    file_name
        .strip_prefix(FSTATE_PREFIX)?
        .strip_suffix(FSTATE_SUFFIX)?
        .parse::<i64>()
        .ok()
        .map(SimTime::from_nanos)
}

/// Parse `current,destination,next,own_if,next_if[,next,own_if,next_if]...`
/// lines. Blank lines and `#` comments are skipped.
pub fn parse_fstate(text: &str, file: &str) -> Result<Vec<FstateEntry>> {
    let mut entries = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parse_err = |message: String| ReplayError::Parse {
            file: file.to_string(),
            line: i + 1,
            message,
        };

        let fields = line
            .split(',')
            .map(|f| f.trim().parse::<i32>())
            .collect::<std::result::Result<Vec<i32>, _>>()
            .map_err(|e| parse_err(format!("not an integer list ({})", e)))?;

        if fields.len() < 5 || (fields.len() - 2) % 3 != 0 {
            return Err(parse_err(format!(
                "expected current,destination followed by triples, got {} fields",
                fields.len()
            )));
        }

        let next_hops = fields[2..]
            .chunks_exact(3)
            .map(|t| NextHopOption::new(t[0], t[1], t[2]))
            .collect();
        entries.push(FstateEntry {
            current: fields[0],
            destination: fields[1],
            next_hops,
        });
    }
    Ok(entries)
}

/// Load one forwarding-state file
pub fn load_fstate(path: impl AsRef<Path>) -> Result<Vec<FstateEntry>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let entries = parse_fstate(&text, &path.display().to_string())?;
    debug!("Loaded {} forwarding entries from {:?}", entries.len(), path);
    Ok(entries)
}

/// Every `fstate_<t_ns>.txt` in `dir`, sorted by timestamp
pub fn load_fstate_dir(dir: impl AsRef<Path>) -> Result<Vec<(SimTime, Vec<FstateEntry>)>> {
    let dir = dir.as_ref();
    info!("Loading forwarding state from {:?}", dir);

    let mut files: Vec<(SimTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match parse_fstate_time(name) {
            Some(t) => files.push((t, path)),
            None if name.starts_with(FSTATE_PREFIX) => {
                warn!("Skipping {:?}: no timestamp in file name", path);
            }
            None => {}
        }
    }
    files.sort();

    let mut out = Vec::with_capacity(files.len());
    for (t, path) in files {
        out.push((t, load_fstate(&path)?));
    }
    info!("Loaded {} forwarding-state files", out.len());
    Ok(out)
}

/// Entries of `node_id` only; lines for other nodes are ignored
pub fn entries_for(entries: &[FstateEntry], node_id: NodeId) -> impl Iterator<Item = &FstateEntry> {
    entries.iter().filter(move |e| e.current == node_id)
}

/// Engine configuration; missing fields take their defaults
pub fn load_config(path: impl AsRef<Path>) -> Result<DeflectionConfig> {
    let path = path.as_ref();
    info!("Loading deflection config from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: DeflectionConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    info!("Loading scenario from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let scenario: Scenario = serde_json::from_reader(reader)?;
    info!(
        "Scenario: {} nodes, {} packets, {} queue samples",
        scenario.num_nodes,
        scenario.packets.len(),
        scenario.queues.len()
    );
    Ok(scenario)
}
