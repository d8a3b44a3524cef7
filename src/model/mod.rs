//! Data model
//!
//! The job arena and the snapshot types carried on the event bus.

mod job;

pub use job::{
    Arena, JobId, JobNode, SuiteInfo, SuiteNode, TestBody, TestError, TestInfo, TestNode,
    TestRecord, TestStatus,
};
