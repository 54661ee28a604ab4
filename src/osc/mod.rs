mod address;
mod args;
mod dispatch;
mod net;
mod translate;

pub use address::{
    AddressKey, AddressTable, CHANNEL_PLACEHOLDER, INDEX_PLACEHOLDER, InboundKey, JUMP_TARGETS,
    OutboundKey,
};
pub use args::{coerce, data_byte, pitch_bend, scale_to_data, seconds};
pub use dispatch::{AddressBook, AddressSnapshot, DispatchTable, EventKind, Route};
pub use net::{OUTBOX_CAPACITY, OscListener, OscOutbox, OscSender};
pub use translate::{GENERIC_CHANNEL, inbound, inbound_generic, kind_from_name, outbound};
