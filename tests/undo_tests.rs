//! Undo/Redo Tests
//!
//! Snapshot history through the layer manager: round trips, redo
//! discipline, depth limits, listeners and settings persistence.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use test_case::test_case;

use maskstack::engine::color_histogram;
use maskstack::layers::LayerState;
use maskstack::state::{UndoEvent, UndoEventType};
use maskstack::{Color, EngineConfig, Layer, LayerManager};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn manager_with_overlays() -> LayerManager {
    init_tracing();
    let mut manager = LayerManager::default();
    manager.set_image(Some(RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 255]))));
    manager.add_overlay("A", Color::RED, 0.5, None).unwrap();
    manager.add_overlay("B", Color::BLUE, 0.5, None).unwrap();
    manager
}

/// Name, enabled flag, applied color and applied alpha of every overlay
fn overlay_settings(manager: &LayerManager) -> Vec<(String, bool, Color, f32)> {
    manager
        .overlays()
        .iter()
        .map(|o| (o.name().to_string(), o.is_enabled(), o.color_applied(), o.alpha_applied()))
        .collect()
}

fn mutate(manager: &mut LayerManager) {
    let a = manager.overlay_mut("A").unwrap();
    a.set_color(Color::GREEN);
    a.set_alpha(0.9).unwrap();
    manager.apply_overlay("A").unwrap();
    manager.set_layer_enabled("B", false).unwrap();
    manager.overlay_mut("B").unwrap().image_mut().put_pixel(0, 0, Rgba([0, 0, 255, 255]));
}

#[test]
fn test_undo_redo_round_trip() {
    let mut manager = manager_with_overlays();
    let before = overlay_settings(&manager);
    manager.add_undo_point("x");

    mutate(&mut manager);
    let after = overlay_settings(&manager);
    let painted = manager.overlay("B").unwrap().image().clone();

    assert!(manager.undo());
    assert_eq!(overlay_settings(&manager), before);
    assert_eq!(manager.overlay("B").unwrap().image().get_pixel(0, 0)[3], 0);

    assert!(manager.redo());
    assert_eq!(overlay_settings(&manager), after);
    assert_eq!(manager.overlay("B").unwrap().image(), &painted);
}

#[test]
fn test_new_undo_point_discards_redo() {
    let mut manager = manager_with_overlays();
    manager.add_undo_point("first");
    mutate(&mut manager);
    manager.undo();
    assert!(manager.can_redo());

    manager.add_undo_point("fresh edit");
    assert!(!manager.can_redo());
}

#[test]
fn test_redo_keeps_remaining_redo_points() {
    let mut manager = manager_with_overlays();
    manager.add_undo_point("one");
    manager.set_layer_enabled("A", false).unwrap();
    manager.add_undo_point("two");
    manager.set_layer_enabled("B", false).unwrap();

    manager.undo();
    manager.undo();
    assert_eq!(manager.undo_manager().redo_count(), 2);

    manager.redo();
    assert_eq!(manager.undo_manager().redo_count(), 1);
    assert!(!manager.overlay("A").unwrap().is_enabled());
    assert!(manager.overlay("B").unwrap().is_enabled());
}

#[test]
fn test_undo_depth_is_bounded() {
    let config = EngineConfig {
        max_undo: Some(3),
        ..EngineConfig::default()
    };
    let mut manager = LayerManager::new(config).unwrap();
    for i in 0..10 {
        manager.add_undo_point(&format!("step {}", i));
    }
    assert_eq!(manager.undo_manager().undo_count(), 3);
    assert_eq!(
        manager.undo_manager().undo_comments(),
        vec!["step 9", "step 8", "step 7"]
    );
}

#[test]
fn test_undo_listener_sees_events() {
    let mut manager = manager_with_overlays();
    let seen: Rc<RefCell<Vec<UndoEventType>>> = Rc::default();
    let sink = Rc::clone(&seen);
    manager
        .undo_manager_mut()
        .add_listener(Box::new(move |e: &UndoEvent| sink.borrow_mut().push(e.event_type)));

    manager.add_undo_point("x");
    manager.undo();
    manager.redo();
    manager.clear();

    assert_eq!(
        *seen.borrow(),
        vec![
            UndoEventType::AddUndo,
            UndoEventType::Undo,
            UndoEventType::AddRedo,
            UndoEventType::Redo,
            UndoEventType::AddUndo,
            UndoEventType::Clear,
        ]
    );
}

#[test]
fn test_combined_undo_restores_raster_but_not_sub_layer_colors() {
    let mut manager = LayerManager::default();
    manager.set_image(Some(RgbaImage::new(2, 2)));
    manager.set_split_layers(false);
    let mut mask = RgbaImage::new(2, 2);
    mask.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
    manager.add_combined("cls", Color::RED, 0.5, Some(&mask)).unwrap();
    manager.add_undo_point("before recolor");

    manager
        .combined_mut()
        .unwrap()
        .sub_layer_mut("cls")
        .unwrap()
        .set_color(Color::GREEN);
    manager.apply_sub_layer("cls").unwrap();
    manager.undo();

    let combined = manager.combined().unwrap();
    assert_eq!(
        Color::from(*combined.image().unwrap().get_pixel(0, 0)),
        Color::RED.with_alpha(0.5)
    );
    // Sub-layer parameters are not part of the restore.
    assert_eq!(
        combined.sub_layer("cls").unwrap().applied_color(),
        Color::GREEN.with_alpha(0.5)
    );
}

#[test]
fn test_undo_drops_combined_layer_created_later() {
    let mut manager = LayerManager::default();
    manager.set_split_layers(false);
    manager.add_undo_point("empty");
    manager.add_combined("cls", Color::RED, 0.5, None).unwrap();

    manager.undo();
    assert!(manager.combined().is_none());
    manager.redo();
    assert!(manager.combined().is_some());
}

#[test]
fn test_combined_redo_recreates_sub_layers() {
    let mut manager = LayerManager::default();
    manager.set_image(Some(RgbaImage::new(2, 1)));
    manager.set_split_layers(false);
    let mut cat = RgbaImage::new(2, 1);
    cat.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
    let mut dog = RgbaImage::new(2, 1);
    dog.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
    manager.add_combined("cat", Color::RED, 0.5, Some(&cat)).unwrap();
    manager.add_undo_point("cat only");
    manager.add_combined("dog", Color::BLUE, 0.5, Some(&dog)).unwrap();

    assert!(manager.undo());
    let names: Vec<&str> = manager.combined().unwrap().sub_layers().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["cat"]);

    assert!(manager.redo());
    let combined = manager.combined().unwrap();
    let names: Vec<&str> = combined.sub_layers().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["cat", "dog"]);
    assert_eq!(combined.active_sub_layer().map(|s| s.name()), Some("cat"));

    // Every colored pixel still belongs to a sub-layer
    let owners: HashSet<Color> = combined.sub_layers().iter().map(|s| s.applied_color()).collect();
    let colors: HashSet<Color> = color_histogram(combined.image().unwrap()).into_keys().collect();
    assert_eq!(colors, owners);
    assert_eq!(
        combined.sub_layer("dog").unwrap().applied_color(),
        Color::BLUE.with_alpha(0.5)
    );
}

#[test]
fn test_set_state_recreates_overlays_without_pruning() {
    let mut manager = manager_with_overlays();
    let saved = manager.state();
    manager.remove_overlay("A").unwrap();
    manager.add_overlay("C", Color::GREEN, 0.5, None).unwrap();

    assert_eq!(manager.set_state(saved), 4);
    let names: Vec<&str> = manager.overlays().iter().map(|o| o.name()).collect();
    assert_eq!(names, vec!["B", "C", "A"]);
    assert_eq!(manager.overlays().iter().filter(|o| o.is_active()).count(), 1);
}

#[test]
fn test_state_mismatch_is_skipped() {
    let mut manager = manager_with_overlays();
    let saved = manager.state();
    manager.set_split_layers(false);

    assert_eq!(manager.set_state(saved), 2);
    assert!(manager.overlays().is_empty());
}

#[test]
fn test_settings_json_carries_no_rasters() {
    let manager = manager_with_overlays();
    let json = manager.settings_to_json().unwrap();
    let parsed: Vec<LayerState> = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.len(), 4);
    assert!(parsed.iter().all(|s| !s.has_raster()));
    assert!(json.contains("\"type\": \"overlay\""));
    assert!(json.contains("#FF0000FF"));
}

#[test]
fn test_settings_restore_recolors_mask() {
    let mut source = manager_with_overlays();
    let overlay = source.overlay_mut("A").unwrap();
    overlay.set_color(Color::GREEN);
    source.apply_overlay("A").unwrap();
    let json = source.settings_to_json().unwrap();

    let mut mask = RgbaImage::new(4, 4);
    mask.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
    let mut target = LayerManager::default();
    target.set_image(Some(RgbaImage::new(4, 4)));
    target.add_overlay("A", Color::RED, 0.5, Some(&mask)).unwrap();

    target.settings_from_json(&json).unwrap();
    let restored = target.overlay("A").unwrap();
    assert_eq!(restored.color_applied(), Color::GREEN);
    assert_eq!(*restored.image().get_pixel(1, 1), Rgba([0, 255, 0, 255]));
}

#[test_case(true ; "enabled")]
#[test_case(false ; "disabled")]
fn test_undo_enabled_flag(enabled: bool) {
    let config = EngineConfig {
        undo_enabled: enabled,
        ..EngineConfig::default()
    };
    let mut manager = LayerManager::new(config).unwrap();
    assert_eq!(manager.is_undo_supported(), enabled);
    assert_eq!(manager.add_undo_point("x"), enabled);
    assert_eq!(manager.can_undo(), enabled);
}

#[test]
fn test_max_undo_locked_once_used() {
    let mut manager = LayerManager::default();
    assert!(manager.undo_manager_mut().set_max_undo(Some(5)).is_ok());
    manager.add_undo_point("x");
    let err = manager.undo_manager_mut().set_max_undo(Some(10)).unwrap_err();
    assert_eq!(err.error_code(), "UNDO_LIMIT_LOCKED");
}
