// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Reciprocal Rank Fusion
//!
//! Each input list is an ordered set of result identifiers. An identifier's
//! fused score is the sum over every list containing it of `1 / (k + rank)`
//! with 0-based ranks, so appearing near the top of several lists beats
//! appearing at the top of one.

use std::collections::HashMap;

pub const DEFAULT_RRF_K: u32 = 60;

/// Fuse ranked identifier lists, highest score first. Ties keep the order
/// in which identifiers were first seen.
pub fn reciprocal_rank_fusion<S: AsRef<str>>(lists: &[Vec<S>], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, (f64, usize)> = HashMap::new();
    let mut seen = 0usize;

    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            let contribution = 1.0 / (k as f64 + rank as f64);
            let entry = scores.entry(id.as_ref()).or_insert_with(|| {
                seen += 1;
                (0.0, seen)
            });
            entry.0 += contribution;
        }
    }

    let mut fused: Vec<(&str, (f64, usize))> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1 .0
            .partial_cmp(&a.1 .0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1 .1.cmp(&b.1 .1))
    });
    fused
        .into_iter()
        .map(|(id, (score, _))| (id.to_string(), score))
        .collect()
}
