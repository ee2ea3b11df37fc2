mod positioning;
mod timer;

pub use self::positioning::{
    LocationSample, Positioning, PositioningOperation, PositioningOutput, SubscriptionId,
};
pub use self::timer::{Timer, TimerId, TimerOperation, TimerOutput};

pub use crux_core::render::Render;
pub use crux_http::Http;
pub use crux_kv::KeyValue;

use crate::app::App;
use crate::event::Event;

pub type AppRender = Render<Event>;
pub type AppHttp = Http<Event>;
pub type AppKv = KeyValue<Event>;
pub type AppPositioning = Positioning<Event>;
pub type AppTimer = Timer<Event>;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: AppRender,
    pub http: AppHttp,
    pub key_value: AppKv,
    pub positioning: AppPositioning,
    pub timer: AppTimer,
}
