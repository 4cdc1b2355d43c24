pub mod config;
pub mod dom;
pub mod model;
pub mod player;
pub mod recorder;
pub mod resource;
pub mod transport;
pub mod util;

pub use config::Config;
pub use dom::{Document, Mutation, NodeKey};
pub use model::{Record, RecordKind, RootEnvelope, SessionResult, SnapshotNode};
pub use player::{
    MemorySurface, MountSurface, PlaybackState, Player, PlayerEvent, PlayerHandle, PlayerOptions,
    ReplayError,
};
pub use recorder::{RecordError, Recorder, RecorderHandle, RecorderOptions, RecordingSession};
pub use resource::ResourceNormalizer;
pub use transport::{
    ChunkStore, HttpTransport, MemoryStore, RecordSink, SessionSource, TransportError,
};
