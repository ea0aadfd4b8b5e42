//! Transport primitives.
//!
//! Both transports are blocking and shared process-wide: the first call to
//! [`shared_http`] or [`shared_engine`] opens the handle, and it stays open
//! for the rest of the run. Settings must be installed with
//! [`configure_http`]/[`configure_engine`] before that first call.

pub mod engine;
pub mod http;

pub use engine::{
    BuildRequest, ContainerEngine, DockerEngine, EngineAddress, EngineSettings, configure_engine,
    shared_engine,
};
pub use http::{
    HttpResponse, HttpSettings, HttpTransport, ReqwestTransport, configure_http, shared_http,
};
