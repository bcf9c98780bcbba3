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

use repograph_llm::LlmError;
use repograph_quality::QualityError;
use repograph_storage::StorageError;
use thiserror::Error;

pub type QueryResult<T> = Result<T, QueryError>;

/// Errors from retrieval and question answering
#[derive(Error, Debug)]
pub enum QueryError {
    /// Question rejected before retrieval
    #[error("Invalid question: {0}")]
    InvalidQuestion(#[from] QualityError),

    /// Project has never been analyzed
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}
