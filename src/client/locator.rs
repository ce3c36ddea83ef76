//! Server address resolution and consistent-hash node location

use crate::CacheError;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::warn;

/// Continuum points per server
const POINTS_PER_NODE: usize = 160;

const FNV_64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_64_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_64_PRIME)
    })
}

/// Resolve a host list such as `"a:11211 b:11211"` or `"a:11211,b:11211"`
///
/// Entries that fail to resolve are dropped; an empty result is an error.
pub async fn resolve_hosts(hosts: &str) -> crate::Result<Vec<SocketAddr>> {
    let mut addrs = Vec::new();

    for host in hosts
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|h| !h.is_empty())
    {
        match tokio::net::lookup_host(host).await {
            Ok(mut resolved) => match resolved.next() {
                Some(addr) => addrs.push(addr),
                None => warn!(host, "Host resolved to no addresses, skipping"),
            },
            Err(e) => warn!(host, error = %e, "Unable to resolve host, skipping"),
        }
    }

    if addrs.is_empty() {
        return Err(CacheError::Config(format!(
            "no resolvable memcached hosts in {hosts:?}"
        )));
    }
    Ok(addrs)
}

/// Consistent-hash ring mapping keys to node indexes
#[derive(Debug, Clone)]
pub struct KetamaLocator {
    continuum: BTreeMap<u64, usize>,
    node_count: usize,
}

impl KetamaLocator {
    pub fn new(addrs: &[SocketAddr]) -> Self {
        let mut continuum = BTreeMap::new();
        for (index, addr) in addrs.iter().enumerate() {
            for point in 0..POINTS_PER_NODE {
                let label = format!("{addr}-{point}");
                continuum.insert(fnv1a_64(label.as_bytes()), index);
            }
        }
        Self {
            continuum,
            node_count: addrs.len(),
        }
    }

    /// Node owning `key`
    pub fn primary(&self, key: &[u8]) -> Option<usize> {
        self.candidates(key).next()
    }

    /// Distinct nodes in ring order starting at the owner of `key`
    pub fn candidates(&self, key: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let hash = fnv1a_64(key);
        let mut seen = vec![false; self.node_count];

        self.continuum
            .range(hash..)
            .chain(self.continuum.range(..hash))
            .map(|(_, &index)| index)
            .filter(move |&index| !std::mem::replace(&mut seen[index], true))
            .take(self.node_count)
    }
}
