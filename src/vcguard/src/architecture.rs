use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::bandwidth::BandwidthTrait;
use crate::cluster::{Cluster, Level, Node};
use crate::Error;

/// Parameters of the 4-level tree: hosts -> racks -> aggregation switches -> a single core switch.
#[derive(Debug, Clone, PartialEq, StructOpt, Serialize, Deserialize)]
pub struct TopoArgs {
    /// Number of aggregation switches under the core switch
    #[structopt(long, default_value = "2")]
    pub naggs: usize,
    /// Number of racks under one aggregation switch
    #[structopt(long, default_value = "2")]
    pub nracks: usize,
    /// Number of hosts under one rack
    #[structopt(long, default_value = "4")]
    pub nhosts: usize,
    /// Number of compute units (VM slots) of each host
    #[structopt(long, default_value = "4")]
    pub slots: usize,
    /// Bandwidth of a host uplink, in Mbps
    #[structopt(long, default_value = "1000")]
    pub host_bw: f64,
    /// Bandwidth of a ToR uplink, in Mbps
    #[structopt(long, default_value = "2000")]
    pub rack_bw: f64,
    /// Bandwidth of an aggregation switch uplink, in Mbps
    #[structopt(long, default_value = "4000")]
    pub agg_bw: f64,
}

impl Default for TopoArgs {
    fn default() -> Self {
        TopoArgs {
            naggs: 2,
            nracks: 2,
            nhosts: 4,
            slots: 4,
            host_bw: 1000.0,
            rack_bw: 2000.0,
            agg_bw: 4000.0,
        }
    }
}

impl TopoArgs {
    fn validate(&self) -> Result<(), Error> {
        let counts = [
            ("naggs", self.naggs),
            ("nracks", self.nracks),
            ("nhosts", self.nhosts),
            ("slots", self.slots),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidTopology(format!("{} must be positive", name)));
        }
        let caps = [
            ("host_bw", self.host_bw),
            ("rack_bw", self.rack_bw),
            ("agg_bw", self.agg_bw),
        ];
        if let Some((name, v)) = caps.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(Error::InvalidTopology(format!(
                "{} must be positive, got {}",
                name, v
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for TopoArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tree_{}x{}x{}x{}",
            self.naggs, self.nracks, self.nhosts, self.slots
        )
    }
}

pub fn build_tree(args: &TopoArgs) -> Result<Cluster, Error> {
    args.validate()?;

    let mut cluster = Cluster::new(args.slots);
    cluster.add_node(Node::new("core", Level::Core));

    let mut rack_id = 0;
    let mut host_id = 0;
    for i in 0..args.naggs {
        let agg_name = format!("agg_{}", i);
        cluster.add_node(Node::new(&agg_name, Level::Aggregation));
        cluster.add_link_by_name("core", &agg_name, args.agg_bw.mbps());

        for _ in 0..args.nracks {
            let tor_name = format!("tor_{}", rack_id);
            cluster.add_node(Node::new(&tor_name, Level::Rack));
            cluster.add_link_by_name(&agg_name, &tor_name, args.rack_bw.mbps());

            for _ in 0..args.nhosts {
                let host_name = format!("host_{}", host_id);
                cluster.add_node(Node::new(&host_name, Level::Host));
                cluster.add_link_by_name(&tor_name, &host_name, args.host_bw.mbps());
                host_id += 1;
            }
            rack_id += 1;
        }
    }

    log::debug!(
        "built {}: {} hosts, {} switches",
        args,
        cluster.num_hosts(),
        cluster.num_switches()
    );

    Ok(cluster)
}
