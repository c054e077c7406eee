pub mod batch;
pub mod batches;
pub mod camera;
pub mod data_store;
pub mod draw_pass;
pub mod draw_passes;
pub mod frame;
pub mod gpu_buffer;
pub mod group;
pub mod group_lights;
pub mod groups;
pub mod item_buffer;
pub mod lights;
pub mod object_draw_pass;
pub mod projection;
pub mod render_context;
pub mod render_thread;
pub mod renderables;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod resources;
pub mod shadow_projection;
pub mod sprite_draw_pass;

pub use batches::{BatchBinding, DrawList, RenderBatch};
pub use camera::Camera;
pub use frame::{FrameRecorder, FrameStats, NullRecorder, RenderFrameParams, RenderGroupTask};
pub use group::{
    Group, DRAW_PASS_CAMERA_OBJECT_OPAQUE, DRAW_PASS_CAMERA_OBJECT_TRANSLUCENT,
    DRAW_PASS_CAMERA_SPRITE,
};
pub use group_lights::{ShadowRenderState, ShadowRenderTarget};
pub use lights::{AttenuationMode, Light, LightType};
pub use object_draw_pass::ObjectDrawPassType;
pub use projection::ViewProjection;
pub use render_thread::RenderThread;
pub use renderables::{ObjectRenderable, PixelRect, SpriteRenderable, StateUpdate};
pub use renderer::Renderer;
pub use resources::{AlphaMode, Aabb, Material, Mesh, MeshLod, TextureInfo};
