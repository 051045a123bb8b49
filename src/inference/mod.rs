//! Photo inference: provider contract, result cache, task queue, durable task state and the
//! worker that ties them together.

pub mod cache;
pub mod openai;
pub mod provider;
pub mod queue;
pub mod repo;
pub mod worker;

use serde::Serialize;
use uuid::Uuid;

use crate::error::PipelineError;
use repo::{InferenceRepo, InferenceResult, InferenceTask, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: InferenceTask,
    pub result: Option<InferenceResult>,
}

/// Task state plus, once `ready`, the latest result.
pub async fn task_status(
    repo: &dyn InferenceRepo,
    image_id: Uuid,
) -> Result<TaskView, PipelineError> {
    let task = repo
        .get_task(image_id)
        .await
        .map_err(PipelineError::Repository)?
        .ok_or_else(|| PipelineError::NotFound(format!("task {image_id}")))?;

    let result = if task.status == TaskStatus::Ready {
        repo.latest_result(image_id)
            .await
            .map_err(PipelineError::Repository)?
    } else {
        None
    };
    Ok(TaskView { task, result })
}
