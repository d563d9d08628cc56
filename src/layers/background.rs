//! Background fill, always drawn first

use super::layer::{Layer, LayerInfo, LayerKind};
use super::state::{BackgroundState, LayerState};
use crate::engine::{Color, DrawContext};

pub const BACKGROUND_LAYER_NAME: &str = "Background";

#[derive(Debug, Clone)]
pub struct BackgroundLayer {
    info: LayerInfo,
    color: Color,
}

impl BackgroundLayer {
    pub fn new(color: Color) -> Self {
        Self {
            info: LayerInfo::fixed(BACKGROUND_LAYER_NAME),
            color,
        }
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }
}

impl Layer for BackgroundLayer {
    fn info(&self) -> &LayerInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut LayerInfo {
        &mut self.info
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Background
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        ctx.fill(self.color);
    }

    fn state(&self) -> LayerState {
        self.settings()
    }

    fn settings(&self) -> LayerState {
        LayerState::Background(BackgroundState {
            name: self.info.name.clone(),
            enabled: self.info.enabled,
            color: self.color,
        })
    }

    fn set_state(&mut self, state: LayerState) -> bool {
        self.set_settings(&state)
    }

    fn set_settings(&mut self, settings: &LayerState) -> bool {
        let LayerState::Background(s) = settings else {
            return false;
        };
        self.info.enabled = s.enabled;
        self.color = s.color;
        true
    }
}
