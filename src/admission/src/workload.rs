use anyhow::{anyhow, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use vcguard::bandwidth::{Bandwidth, BandwidthTrait};
use vcguard::request::{Event, EventKind};
use vcguard::{RequestId, Timestamp};

use crate::config::{ExperimentConfig, SizeDist};

/// One tenant of a generated workload.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: RequestId,
    pub n: usize,
    pub bw: Bandwidth,
    pub arrival: Timestamp,
    pub departure: Timestamp,
}

/// Poisson arrivals with exponentially distributed lifetimes.
#[derive(Debug, Clone)]
pub struct Workload {
    pub tenants: Vec<Tenant>,
    /// every arrival and departure, in the order the brain must process them
    pub events: Vec<Event>,
}

fn seconds_to_ms(secs: f64) -> Timestamp {
    (secs * 1000.0).round() as Timestamp
}

fn sample_size<R: Rng>(size: &SizeDist, rng: &mut R) -> Result<usize> {
    match *size {
        SizeDist::Uniform { min, max } => Ok(rng.gen_range(min..=max)),
        SizeDist::Zipf { max, exponent } => {
            let zipf = zipf::ZipfDistribution::new(max, exponent)
                .map_err(|_| anyhow!("bad zipf parameters: {}, {}", max, exponent))?;
            Ok(zipf.sample(rng))
        }
    }
}

impl Workload {
    pub fn generate(config: &ExperimentConfig, seed: u64) -> Result<Workload> {
        let mut rng = StdRng::seed_from_u64(seed);
        let inter_arrival = Exp::new(config.arrival_rate)?;
        let lifetime = Exp::new(1.0 / config.mean_duration)?;

        let mut tenants = Vec::with_capacity(config.ncases);
        let mut t = 0;
        for id in 0..config.ncases {
            t += seconds_to_ms(inter_arrival.sample(&mut rng));
            let n = sample_size(&config.size, &mut rng)?;
            let bw = config.bandwidth[rng.gen_range(0..config.bandwidth.len())].mbps();
            // a tenant lives at least one tick
            let life = seconds_to_ms(lifetime.sample(&mut rng)).max(1);
            log::debug!("tenant {}: {} x {}, arrival {} ms, lifetime {} ms", id, n, bw, t, life);
            tenants.push(Tenant {
                id,
                n,
                bw,
                arrival: t,
                departure: t + life,
            });
        }

        let mut events: Vec<Event> = tenants
            .iter()
            .flat_map(|tn| {
                let arrival = Event {
                    ts: tn.arrival,
                    request: tn.id,
                    n: tn.n,
                    bw: tn.bw,
                    kind: EventKind::Arrival,
                };
                let departure = Event {
                    ts: tn.departure,
                    kind: EventKind::Departure,
                    ..arrival.clone()
                };
                vec![arrival, departure]
            })
            .collect();
        // departures free resources before arrivals at the same instant
        events.sort_by_key(|e| (e.ts, e.kind == EventKind::Arrival, e.request));

        Ok(Workload { tenants, events })
    }
}
