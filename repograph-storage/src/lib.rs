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

//! Stores used by the analysis pipeline and retrieval: chunk checkpoints,
//! final results and the code vector index.

pub mod checkpoint;
pub mod error;
pub mod persistence;
pub mod vector;

pub use checkpoint::{CheckpointRecord, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use error::{StorageError, StorageResult};
pub use persistence::{MemoryPersistenceStore, PersistenceStore, ProjectRecord, SectionRecord};
pub use vector::{cosine_distance, MemoryVectorIndex, VectorHit, VectorIndex, VectorRecord};
