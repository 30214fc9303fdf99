mod transport;

pub use transport::{ReqwestTransport, ReqwestTransportFactory};
