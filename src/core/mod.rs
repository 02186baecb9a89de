pub mod backtrack;
pub mod driver;
pub mod event_bus;
pub mod run_state;
pub mod runtime_context;

pub use backtrack::{FallbackOutcome, StepOutcome, StepSuccess};
pub use driver::{EngineConfig, ExecutionDriver};
pub use event_bus::{
    ChannelPublisher, EventEmitter, EventPublisher, ExecutionEvent, NoopPublisher, PublishOutcome,
};
pub use run_state::{
    ExecutionRecord, RunOutcome, RunState, RunStatus, RunTotals, SkipReason, StepOutput,
    StepRecord, StepStatus,
};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
