//! Pipeline Data Model
//!
//! A pipeline is an ordered list of [`Node`]s. Each node is a leaf step, a
//! loop, a foreach or another pipeline, so pipelines nest to any depth.
//!
//! # Flattened plan
//!
//! [`Pipeline::flatten_steps`] expands the tree depth-first into the list of
//! leaf steps used for progress reporting. Loop and foreach templates
//! contribute their leaves once, whatever the iteration count turns out to
//! be at run time.
//!
//! ```text
//! root
//! ├── A                      plan: [A, B, C]
//! ├── foreach(items) ── B
//! └── C
//! ```

use std::fmt;

use log::info;

use super::context::Context;
use super::iteration::{ForeachStep, LoopStep};
use super::step::{FnStep, Step, StepInfo};
use crate::error::EngineError;
use crate::execution::step::run_leaf;
use crate::execution::ProgressTracker;
use crate::monitoring::ProgressBroadcaster;

/// One node of the execution tree.
pub enum Node {
    Leaf(Box<dyn Step>),
    Loop(LoopStep),
    Foreach(ForeachStep),
    Pipeline(Pipeline),
}

impl Node {
    /// Wraps a concrete step as a leaf node.
    pub fn leaf(step: impl Step + 'static) -> Self {
        Self::Leaf(Box::new(step))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Leaf(step) => step.name(),
            Self::Loop(step) => step.name(),
            Self::Foreach(step) => step.name(),
            Self::Pipeline(pipeline) => pipeline.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Leaf(step) => step.description(),
            Self::Loop(step) => step.description(),
            Self::Foreach(step) => step.description(),
            Self::Pipeline(pipeline) => pipeline.description(),
        }
    }

    /// Returns the leaf steps of this node in depth-first order.
    pub fn flatten_steps(&self) -> Vec<&dyn Step> {
        let mut leaves = Vec::new();
        self.flatten_into(&mut leaves);
        leaves
    }

    /// Number of entries this node contributes to a flattened plan.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Loop(step) => step.template().leaf_count(),
            Self::Foreach(step) => step.template().leaf_count(),
            Self::Pipeline(pipeline) => pipeline.leaf_count(),
        }
    }

    fn flatten_into<'a>(&'a self, leaves: &mut Vec<&'a dyn Step>) {
        match self {
            Self::Leaf(step) => leaves.push(step.as_ref()),
            Self::Loop(step) => step.template().flatten_into(leaves),
            Self::Foreach(step) => step.template().flatten_into(leaves),
            Self::Pipeline(pipeline) => {
                for child in pipeline.steps() {
                    child.flatten_into(leaves);
                }
            }
        }
    }

    /// Runs this node without publishing progress.
    ///
    /// Used for loop and foreach templates, whose progress is reported as a
    /// single slot per iteration by the enclosing pipeline.
    pub fn run(&self, context: &mut Context) -> Result<(), EngineError> {
        match self {
            Self::Leaf(step) => run_leaf(step.as_ref(), context),
            Self::Loop(step) => step.run(context),
            Self::Foreach(step) => step.run(context),
            Self::Pipeline(pipeline) => pipeline.execute(context),
        }
    }
}

impl From<FnStep> for Node {
    fn from(step: FnStep) -> Self {
        Self::leaf(step)
    }
}

impl From<LoopStep> for Node {
    fn from(step: LoopStep) -> Self {
        Self::Loop(step)
    }
}

impl From<ForeachStep> for Node {
    fn from(step: ForeachStep) -> Self {
        Self::Foreach(step)
    }
}

impl From<Pipeline> for Node {
    fn from(pipeline: Pipeline) -> Self {
        Self::Pipeline(pipeline)
    }
}

/// An ordered composite of nodes.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use steprunner::pipeline::{FnStep, ForeachStep, Pipeline};
///
/// let pipeline = Pipeline::new("root", "Example", vec![
///     FnStep::new("a", "First", |_, _| Ok(Some(json!(1)))).into(),
///     ForeachStep::new("each", "Per item", FnStep::new("b", "Body", |_, _| Ok(None)))
///         .with_input(|ctx| Ok(ctx.require("items")?.clone()))
///         .into(),
///     FnStep::new("c", "Last", |_, _| Ok(None)).into(),
/// ]);
///
/// let plan: Vec<_> = pipeline.plan().into_iter().map(|s| s.name).collect();
/// assert_eq!(plan, vec!["a", "b", "c"]);
/// ```
pub struct Pipeline {
    name: String,
    description: String,
    steps: Vec<Node>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<Node>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: description.into(),
            steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the direct children in declaration order.
    pub fn steps(&self) -> &[Node] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the leaf steps in depth-first declaration order.
    pub fn flatten_steps(&self) -> Vec<&dyn Step> {
        let mut leaves = Vec::new();
        for child in &self.steps {
            child.flatten_into(&mut leaves);
        }
        leaves
    }

    /// Returns the flattened plan as name/description pairs.
    pub fn plan(&self) -> Vec<StepInfo> {
        self.flatten_steps().into_iter().map(|s| s.info()).collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.steps.iter().map(Node::leaf_count).sum()
    }

    /// Runs the pipeline, publishing a progress snapshot for the run before
    /// every leaf, loop and foreach iteration.
    ///
    /// The context must carry a run identifier and a scheduler handle;
    /// otherwise the run fails before any step executes.
    pub fn run(
        &self,
        context: &mut Context,
        broadcaster: &ProgressBroadcaster,
    ) -> Result<(), EngineError> {
        let run_id = context.require_run_id()?.to_string();
        if context.scheduler().is_none() {
            return Err(EngineError::MissingScheduler {
                step: self.name.clone(),
            });
        }

        let mut tracker = ProgressTracker::new(run_id.clone(), self.plan(), broadcaster);
        info!(
            "Run '{}': starting pipeline '{}' ({} planned steps)",
            run_id,
            self.name,
            tracker.plan_len()
        );

        self.run_children(context, Some(&mut tracker))
    }

    /// Runs the pipeline without publishing progress.
    pub fn execute(&self, context: &mut Context) -> Result<(), EngineError> {
        self.run_children(context, None)
    }

    pub(crate) fn run_children(
        &self,
        context: &mut Context,
        mut tracker: Option<&mut ProgressTracker<'_>>,
    ) -> Result<(), EngineError> {
        for child in &self.steps {
            match child {
                Node::Pipeline(pipeline) => {
                    let start = tracker.as_deref().map(ProgressTracker::cursor);
                    pipeline.run_children(context, tracker.as_deref_mut())?;

                    if let (Some(tracker), Some(start)) = (tracker.as_deref_mut(), start) {
                        tracker.set_cursor(start + pipeline.leaf_count());
                    }
                }
                Node::Foreach(step) => step.run_tracked(context, tracker.as_deref_mut())?,
                Node::Loop(_) | Node::Leaf(_) => {
                    if let Some(tracker) = tracker.as_deref_mut() {
                        tracker.publish();
                    }

                    child.run(context)?;

                    if let Some(tracker) = tracker.as_deref_mut() {
                        tracker.advance(1);
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{MetricsDrain, MetricsRecorder, ProgressEvent};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn noop(name: &str) -> Node {
        FnStep::new(name, format!("{} step", name), |_, _| Ok(None)).into()
    }

    fn tracing_step(name: &str) -> Node {
        let owned = name.to_string();
        FnStep::new(name, format!("{} step", name), move |_, ctx| {
            let mut order = ctx.get("order").cloned().unwrap_or_else(|| json!([]));
            let label = match ctx.current() {
                Some(item) => format!("{}({})", owned, item.as_str().unwrap_or("?")),
                None => owned.clone(),
            };
            if let Some(list) = order.as_array_mut() {
                list.push(json!(label));
            }
            ctx.set("order", order);
            Ok(None)
        })
        .into()
    }

    fn failing(name: &str) -> Node {
        FnStep::new(name, "Always fails", |_, _| Err("exploded".into())).into()
    }

    fn context_with(run_id: &str) -> (Context, MetricsDrain) {
        let (recorder, drain) = MetricsRecorder::channel();
        (
            Context::new().with_run_id(run_id).with_scheduler(recorder),
            drain,
        )
    }

    fn collect_events(broadcaster: &ProgressBroadcaster, run_id: &str) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        broadcaster.subscribe(run_id, move |message| {
            sink.lock().unwrap().push(message.to_string());
        });
        events
    }

    fn snapshots(events: &Arc<Mutex<Vec<String>>>) -> Vec<(Vec<String>, Vec<String>)> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match serde_json::from_str::<ProgressEvent>(m).unwrap() {
                ProgressEvent::Progress(snapshot) => Some((
                    snapshot.executed.into_iter().map(|s| s.name).collect(),
                    snapshot.running.into_iter().map(|s| s.name).collect(),
                )),
                _ => None,
            })
            .collect()
    }

    fn example_pipeline() -> Pipeline {
        Pipeline::new(
            "root",
            "Example",
            vec![
                tracing_step("A"),
                ForeachStep::new("each", "Per item", tracing_step("B"))
                    .with_input(|ctx| Ok(json!({"items": ctx.require("items")?.clone()})))
                    .into(),
                tracing_step("C"),
            ],
        )
    }

    #[test]
    fn test_flatten_nested_depth() {
        let inner = Pipeline::new("inner", "Inner", vec![noop("c"), noop("d")]);
        let deeper = Pipeline::new("deeper", "Deeper", vec![inner.into(), noop("e")]);
        let pipeline = Pipeline::new(
            "root",
            "Root",
            vec![
                noop("a"),
                LoopStep::with_default("loop", "Loop", noop("b")).into(),
                deeper.into(),
                ForeachStep::new(
                    "each",
                    "Each",
                    Pipeline::new("body", "Body", vec![noop("f"), noop("g")]),
                )
                .into(),
            ],
        );

        let names: Vec<&str> = pipeline.flatten_steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e", "f", "g"]);
        assert_eq!(pipeline.leaf_count(), 7);
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let pipeline = example_pipeline();
        assert_eq!(pipeline.plan(), pipeline.plan());
    }

    #[test]
    fn test_example_scenario() {
        let pipeline = example_pipeline();
        let broadcaster = ProgressBroadcaster::new();
        let events = collect_events(&broadcaster, "r1");
        let (context, _drain) = context_with("r1");
        let mut context = context.with_value("items", json!(["x", "y"]));

        pipeline.run(&mut context, &broadcaster).unwrap();

        let plan: Vec<String> = pipeline.plan().into_iter().map(|s| s.name).collect();
        assert_eq!(plan, vec!["A", "B", "C"]);

        assert_eq!(
            context.get("order"),
            Some(&json!(["A", "B(x)", "B(y)", "C"]))
        );

        let sampled: Vec<&str> = context.metrics().iter().map(|m| m.step.as_str()).collect();
        assert_eq!(sampled, vec!["A", "B", "B", "C"]);
        assert!(context.metrics().iter().all(|m| m.duration_secs >= 0.0));

        let snaps = snapshots(&events);
        assert_eq!(snaps.len(), 4);
        for (executed, running) in &snaps {
            assert_eq!(executed.len() + running.len(), plan.len());
            assert_eq!(executed.as_slice(), &plan[..executed.len()]);
        }
        assert!(snaps[0].0.is_empty());
    }

    #[test]
    fn test_steps_after_foreach_stay_running_until_started() {
        let pipeline = Pipeline::new(
            "root",
            "Root",
            vec![
                noop("A"),
                ForeachStep::new("each", "Per item", noop("B"))
                    .with_input(|_| Ok(json!(["x", "y", "z"])))
                    .into(),
                noop("C"),
                noop("D"),
            ],
        );
        let broadcaster = ProgressBroadcaster::new();
        let events = collect_events(&broadcaster, "r1");
        let (mut context, _drain) = context_with("r1");

        pipeline.run(&mut context, &broadcaster).unwrap();

        let executed: Vec<Vec<String>> = snapshots(&events).into_iter().map(|(e, _)| e).collect();
        assert_eq!(
            executed,
            vec![
                Vec::<String>::new(),
                vec!["A".to_string()],
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
            ]
        );
    }

    #[test]
    fn test_foreach_item_not_visible_to_later_siblings() {
        let pipeline = Pipeline::new(
            "root",
            "Root",
            vec![
                ForeachStep::new(
                    "outer",
                    "Per word",
                    Pipeline::new(
                        "body",
                        "Body",
                        vec![
                            ForeachStep::new("inner", "Per letter", tracing_step("L"))
                                .with_input(|_| Ok(json!(["a"])))
                                .into(),
                            tracing_step("W"),
                        ],
                    ),
                )
                .with_input(|_| Ok(json!(["x", "y"])))
                .into(),
                tracing_step("T"),
            ],
        );
        let (mut context, _drain) = context_with("r1");

        pipeline.run(&mut context, &ProgressBroadcaster::new()).unwrap();

        assert_eq!(
            context.get("order"),
            Some(&json!(["L(a)", "W(x)", "L(a)", "W(y)", "T"]))
        );
    }

    #[test]
    fn test_pipeline_debug_summarizes() {
        let debug = format!("{:?}", example_pipeline());
        assert!(debug.contains("\"root\""));
        assert!(debug.contains("steps: 3"));
    }

    #[test]
    fn test_nested_pipeline_resyncs_cursor() {
        let inner = Pipeline::new(
            "inner",
            "Inner",
            vec![
                ForeachStep::new("each", "Each", Pipeline::new("body", "Body", vec![noop("b1"), noop("b2")]))
                    .with_input(|_| Ok(json!(["only"])))
                    .into(),
            ],
        );
        let pipeline = Pipeline::new("root", "Root", vec![noop("a"), inner.into(), noop("c")]);
        let broadcaster = ProgressBroadcaster::new();
        let events = collect_events(&broadcaster, "r1");
        let (mut context, _drain) = context_with("r1");

        pipeline.run(&mut context, &broadcaster).unwrap();

        let snaps = snapshots(&events);
        let last = snaps.last().unwrap();
        assert_eq!(last.0, vec!["a", "b1", "b2"]);
        assert_eq!(last.1, vec!["c"]);
    }

    #[test]
    fn test_failure_stops_run_and_keeps_prior_metrics() {
        let pipeline = Pipeline::new(
            "root",
            "Root",
            vec![noop("a"), noop("b"), failing("c"), noop("d")],
        );
        let broadcaster = ProgressBroadcaster::new();
        let (mut context, _drain) = context_with("r1");

        let err = pipeline.run(&mut context, &broadcaster).unwrap_err();

        assert_eq!(err.failed_step(), Some("c"));
        assert!(err.to_string().contains("Always fails"));
        assert_eq!(context.metrics().len(), 2);
    }

    #[test]
    fn test_missing_input_aborts_before_execute() {
        let pipeline = Pipeline::new(
            "root",
            "Root",
            vec![
                noop("a"),
                FnStep::new("needs_text", "Reads text", |_, ctx| {
                    ctx.set("executed", true);
                    Ok(None)
                })
                .with_input(|ctx| Ok(ctx.require("text")?.clone()))
                .into(),
            ],
        );
        let broadcaster = ProgressBroadcaster::new();
        let (mut context, _drain) = context_with("r1");

        let err = pipeline.run(&mut context, &broadcaster).unwrap_err();

        assert_eq!(err.failed_step(), Some("needs_text"));
        assert!(!context.contains("executed"));
        assert_eq!(context.metrics().len(), 1);
    }

    #[test]
    fn test_run_requires_run_id() {
        let pipeline = Pipeline::new("root", "Root", vec![noop("a")]);
        let (recorder, _drain) = MetricsRecorder::channel();
        let mut context = Context::new().with_scheduler(recorder);

        let err = pipeline
            .run(&mut context, &ProgressBroadcaster::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRunId));
        assert!(context.metrics().is_empty());
    }

    #[test]
    fn test_run_requires_scheduler() {
        let pipeline = Pipeline::new("root", "Root", vec![noop("a")]);
        let mut context = Context::new().with_run_id("r1");

        let err = pipeline
            .run(&mut context, &ProgressBroadcaster::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingScheduler { .. }));
    }

    #[test]
    fn test_runs_are_isolated_by_key() {
        let pipeline = Pipeline::new("root", "Root", vec![noop("a")]);
        let broadcaster = ProgressBroadcaster::new();
        let other = collect_events(&broadcaster, "other");
        let (mut context, _drain) = context_with("r1");

        pipeline.run(&mut context, &broadcaster).unwrap();
        assert!(other.lock().unwrap().is_empty());
    }

    #[test]
    fn test_execute_publishes_nothing() {
        let pipeline = Pipeline::new("root", "Root", vec![noop("a"), noop("b")]);
        let (mut context, _drain) = context_with("r1");

        pipeline.execute(&mut context).unwrap();
        assert_eq!(context.metrics().len(), 2);
    }

    #[test]
    fn test_node_names() {
        let node: Node = LoopStep::with_default("loop", "Loops", noop("x")).into();
        assert_eq!(node.name(), "loop");
        assert_eq!(node.description(), "Loops");
        assert_eq!(node.leaf_count(), 1);
    }
}
