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

//! Retrieval over analyzed repositories
//!
//! Vector and keyword search fused with Reciprocal Rank Fusion, rendered
//! into a bounded context block for grounded question answering.

pub mod answer;
pub mod context;
pub mod error;
pub mod keywords;
pub mod retriever;
pub mod rrf;

pub use answer::{Answer, QuestionAnswerer};
pub use context::{format_context, NO_CONTEXT};
pub use error::{QueryError, QueryResult};
pub use keywords::extract_keywords;
pub use retriever::{result_id, HybridRetriever, RetrievedContext, VECTOR_TARGET};
pub use rrf::{reciprocal_rank_fusion, DEFAULT_RRF_K};
