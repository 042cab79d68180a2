mod decode;
mod generalized;

pub use generalized::{
    StreamingFactory, StreamingListener, StreamingListenerBuilder, StreamingTransport,
};
