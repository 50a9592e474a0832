use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use evalflow_types::DataItem;
use serde_json::{Map, Value};

/// What a task sees of one data item: the input, the optional expected value and every
/// extra field the item carried.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskArgs {
	pub input: Value,
	pub expected: Option<Value>,
	pub extra: Map<String, Value>,
}

impl TaskArgs {
	pub fn from_item(item: &DataItem) -> Self {
		Self {
			input: item.input.clone(),
			expected: item.expected.clone(),
			extra: item.extra.clone(),
		}
	}
}

/// The system under evaluation, usually a model call.
#[async_trait]
pub trait Task: Send + Sync {
	async fn run(&self, args: &TaskArgs) -> Result<Value>;
}

/// Wrap an async closure as a `Task`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Task>
where
	F: Send + Sync + 'static + Fn(TaskArgs) -> Fut,
	Fut: Future<Output = Result<Value>> + Send + 'static,
{
	struct ClosureTask<F> {
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Task for ClosureTask<F>
	where
		F: Send + Sync + 'static + Fn(TaskArgs) -> Fut,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		async fn run(&self, args: &TaskArgs) -> Result<Value> {
			(self.f)(args.clone()).await
		}
	}

	Arc::new(ClosureTask { f })
}

/// Wrap a synchronous closure as a `Task`.
pub fn from_fn<F>(f: F) -> Arc<dyn Task>
where
	F: Send + Sync + 'static + Fn(&TaskArgs) -> Result<Value>,
{
	struct SyncTask<F> {
		f: F,
	}

	#[async_trait]
	impl<F> Task for SyncTask<F>
	where
		F: Send + Sync + 'static + Fn(&TaskArgs) -> Result<Value>,
	{
		async fn run(&self, args: &TaskArgs) -> Result<Value> {
			(self.f)(args)
		}
	}

	Arc::new(SyncTask { f })
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn closure_task_receives_extra_fields() {
		let task = from_async_fn(|args: TaskArgs| async move {
			let locale = args.extra.get("locale").cloned().unwrap_or(Value::Null);
			Ok(json!({ "input": args.input, "locale": locale }))
		});
		let item = DataItem::new(json!("hi"), json!("HI")).with_extra("locale", json!("en"));
		let out = task.run(&TaskArgs::from_item(&item)).await.unwrap();
		assert_eq!(out, json!({ "input": "hi", "locale": "en" }));
	}

	#[tokio::test]
	async fn sync_task_errors_propagate() {
		let task = from_fn(|args| match args.input.as_str() {
			Some(s) => Ok(json!(s.to_uppercase())),
			None => anyhow::bail!("input must be a string"),
		});
		let ok = task.run(&TaskArgs::from_item(&DataItem::input_only(json!("a")))).await.unwrap();
		assert_eq!(ok, json!("A"));
		let err = task.run(&TaskArgs::from_item(&DataItem::input_only(json!(1)))).await.unwrap_err();
		assert!(err.to_string().contains("must be a string"));
	}
}
