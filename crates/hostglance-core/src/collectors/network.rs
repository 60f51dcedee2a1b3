//! Network collector: `/proc/net/dev`, rate derivation between samples.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::{Network, NetworkInterface};

const EXCLUDED_PREFIXES: &[&str] = &["lo", "veth", "docker", "br-", "virbr"];

fn is_excluded(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
}

struct Counters {
    rx_bytes: u64,
    tx_bytes: u64,
}

fn parse_net_dev(contents: &str) -> Vec<(String, Counters)> {
    let mut out = Vec::new();
    for line in contents.lines() {
        if !line.contains(':') || line.contains('|') {
            continue;
        }
        let Some((name, rest)) = line.split_once(':') else { continue };
        let name = name.trim().to_string();
        let mut fields = rest.split_whitespace();
        let Some(rx_bytes) = fields.next().and_then(|v| v.parse().ok()) else { continue };
        // skip rx_packets, rx_errs, rx_drop, rx_fifo, rx_frame, rx_compressed, rx_multicast
        for _ in 0..7 {
            fields.next();
        }
        let Some(tx_bytes) = fields.next().and_then(|v| v.parse().ok()) else { continue };
        out.push((name, Counters { rx_bytes, tx_bytes }));
    }
    out
}

pub struct NetworkCollector {
    prev: Option<(HashMap<String, Counters>, Instant)>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self { prev: None }
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, churn: &ChurnCounter) -> Network {
        let contents = match fs.read_to_string(Path::new("/proc/net/dev")) {
            Ok(c) => c,
            Err(_) => {
                churn.note(ChurnKind::SystemSource);
                return Network::default();
            }
        };

        let now = Instant::now();
        let parsed: Vec<(String, Counters)> = parse_net_dev(&contents).into_iter().filter(|(n, _)| !is_excluded(n)).collect();

        let mut out = Network::default();
        let wall_secs = self.prev.as_ref().map(|(_, at)| now.duration_since(*at).as_secs_f64()).unwrap_or(0.0).max(0.0);

        for (name, counters) in &parsed {
            let prev_counters = self.prev.as_ref().and_then(|(map, _)| map.get(name));
            let (rx_rate, tx_rate) = match (prev_counters, wall_secs > 0.0) {
                (Some(prev), true) if counters.rx_bytes >= prev.rx_bytes && counters.tx_bytes >= prev.tx_bytes => (
                    (counters.rx_bytes - prev.rx_bytes) as f64 / wall_secs,
                    (counters.tx_bytes - prev.tx_bytes) as f64 / wall_secs,
                ),
                _ => (0.0, 0.0),
            };
            out.rx_bytes_per_sec += rx_rate;
            out.tx_bytes_per_sec += tx_rate;
            out.interfaces.push(NetworkInterface {
                name: name.clone(),
                rx_bytes: counters.rx_bytes,
                tx_bytes: counters.tx_bytes,
                rx_bytes_per_sec: rx_rate,
                tx_bytes_per_sec: tx_rate,
            });
        }

        let map: HashMap<String, Counters> = parsed.into_iter().collect();
        self.prev = Some((map, now));
        out
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFs;

    const HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

    #[test]
    fn excludes_loopback_and_docker() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/net/dev",
            format!("{HEADER}  lo: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\ndocker0: 200 1 0 0 0 0 0 0 200 1 0 0 0 0 0 0\n  eth0: 300 1 0 0 0 0 0 0 300 1 0 0 0 0 0 0\n"),
        );
        let mut collector = NetworkCollector::new();
        let net = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(net.interfaces.len(), 1);
        assert_eq!(net.interfaces[0].name, "eth0");
    }

    #[test]
    fn first_call_yields_zero_rate() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/net/dev", format!("{HEADER}  eth0: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\n"));
        let mut collector = NetworkCollector::new();
        let net = collector.sample(&fs, &ChurnCounter::new());
        assert_eq!(net.interfaces[0].rx_bytes_per_sec, 0.0);
    }
}
