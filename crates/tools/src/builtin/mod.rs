//! Built-in Tools

mod music;
mod session;
mod time;

pub use music::PlayMusicTool;
pub use session::EndSessionTool;
pub use time::CurrentTimeTool;

use std::path::PathBuf;

use crate::registry::ToolRegistry;

/// Register the stock tool set.
pub fn register_builtin_tools(registry: &ToolRegistry, music_dir: PathBuf) {
    registry.register_system(PlayMusicTool::new(music_dir));
    registry.register_system(EndSessionTool);
    registry.register_function(CurrentTimeTool);
}
