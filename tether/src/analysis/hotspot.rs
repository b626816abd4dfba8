//! Hotspot analysis of CPU samples.
//!
//! Aggregates [`StackRecord`]s by the function at the top of each sampled
//! shadow stack to find where units spend their time.
//!
//! - `record_sample()`: O(1) amortized plus one symbol lookup
//! - `to_hotspots()`: O(n log n) where n = unique functions

// Percentage calculations intentionally convert counts to f64
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

use crate::domain::Address;
use crate::profiling::StackRecord;
use crate::symbolization::SymbolResolver;

/// Maximum distinct call stacks kept per hotspot
const MAX_CALL_STACKS_PER_HOTSPOT: usize = 5;

/// A function with its share of the samples
#[derive(Debug, Clone)]
pub struct FunctionHotspot {
    pub name: String,
    pub count: usize,
    /// Share of all attributed samples (0.0 - 100.0)
    pub percentage: f64,
    /// Worker id → sample count
    pub workers: HashMap<u32, usize>,
    /// Source location, when debug info was available
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Most frequent call paths first, outermost frame first
    pub call_stacks: Vec<Vec<Address>>,
}

#[derive(Debug, Clone)]
struct FunctionStats {
    count: u64,
    workers: HashMap<u32, u64>,
    file: Option<String>,
    line: Option<u32>,
    call_stacks: Vec<(Vec<Address>, u64)>,
}

/// Incremental hotspot aggregator
#[derive(Debug, Default)]
pub struct HotspotStats {
    functions: HashMap<String, FunctionStats>,
    total_samples: u64,
    /// Samples taken while no frame was entered
    unattributed: u64,
}

impl HotspotStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate one sample, naming its leaf frame through `resolver`
    pub fn record_sample(&mut self, sample: &StackRecord, resolver: &SymbolResolver) {
        let Some(leaf) = sample.leaf() else {
            self.unattributed += 1;
            return;
        };
        self.total_samples += 1;

        let stats = self.functions.entry(resolver.frame_name(leaf)).or_insert_with(|| {
            let location = resolver
                .frame_at(leaf)
                .and_then(|frame| frame.frames.into_iter().next())
                .and_then(|f| f.location);
            FunctionStats {
                count: 0,
                workers: HashMap::new(),
                file: location.as_ref().and_then(|l| l.file.clone()),
                line: location.and_then(|l| l.line),
                call_stacks: Vec::new(),
            }
        });

        stats.count += 1;
        if let Some(worker) = sample.worker {
            *stats.workers.entry(worker.0).or_insert(0) += 1;
        }

        if let Some((_, count)) =
            stats.call_stacks.iter_mut().find(|(stack, _)| *stack == sample.stack)
        {
            *count += 1;
        } else if stats.call_stacks.len() < MAX_CALL_STACKS_PER_HOTSPOT {
            stats.call_stacks.push((sample.stack.clone(), 1));
        }
    }

    pub fn record_samples(&mut self, samples: &[StackRecord], resolver: &SymbolResolver) {
        for sample in samples {
            self.record_sample(sample, resolver);
        }
    }

    /// Samples attributed to a function
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    #[must_use]
    pub fn unattributed_samples(&self) -> u64 {
        self.unattributed
    }

    /// Hotspots, most sampled first
    #[must_use]
    pub fn to_hotspots(&self) -> Vec<FunctionHotspot> {
        let mut hotspots: Vec<FunctionHotspot> = self
            .functions
            .iter()
            .map(|(name, stats)| {
                let percentage = if self.total_samples > 0 {
                    (stats.count as f64 / self.total_samples as f64) * 100.0
                } else {
                    0.0
                };

                let mut sorted_stacks = stats.call_stacks.clone();
                sorted_stacks.sort_by_key(|(_, count)| std::cmp::Reverse(*count));

                FunctionHotspot {
                    name: name.clone(),
                    count: usize::try_from(stats.count).unwrap_or(usize::MAX),
                    percentage,
                    workers: stats
                        .workers
                        .iter()
                        .map(|(&k, &v)| (k, usize::try_from(v).unwrap_or(usize::MAX)))
                        .collect(),
                    file: stats.file.clone(),
                    line: stats.line,
                    call_stacks: sorted_stacks.into_iter().map(|(stack, _)| stack).collect(),
                }
            })
            .collect();

        hotspots.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        hotspots
    }
}
