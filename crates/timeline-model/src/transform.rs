//! Per-clip geometric transforms and their keyframes.
//!
//! Translation is normalized to the canvas dimensions (`0.5` moves the clip
//! by half the canvas width/height) and scale is the fraction of the canvas
//! the clip covers (`1.0` fills it). Rotation is stored in degrees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// A transform keyframe, positioned relative to the start of its clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipTransform {
    pub relative_position: Timestamp,
    pub translate_x: f32,
    pub translate_y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
}

impl ClipTransform {
    /// Identity transform at the start of the clip.
    pub const IDENTITY: ClipTransform = ClipTransform {
        relative_position: Timestamp::ZERO,
        translate_x: 0.0,
        translate_y: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
        rotation: 0.0,
    };

    pub fn at(relative_position: Timestamp) -> Self {
        Self {
            relative_position,
            ..Self::IDENTITY
        }
    }

    pub fn with_translate(mut self, x: f32, y: f32) -> Self {
        self.translate_x = x;
        self.translate_y = y;
        self
    }

    pub fn with_scale(mut self, x: f32, y: f32) -> Self {
        self.scale_x = x;
        self.scale_y = y;
        self
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }
}

impl Default for ClipTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Ordered, never-empty set of transform keyframes keyed by relative position.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSet {
    keyframes: BTreeMap<Timestamp, ClipTransform>,
}

impl TransformSet {
    /// Creates a set holding `origin` at relative position zero.
    pub fn new(origin: ClipTransform) -> Self {
        let origin = ClipTransform {
            relative_position: Timestamp::ZERO,
            ..origin
        };
        let mut keyframes = BTreeMap::new();
        keyframes.insert(Timestamp::ZERO, origin);
        Self { keyframes }
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClipTransform> {
        self.keyframes.values()
    }

    pub fn first(&self) -> &ClipTransform {
        self.keyframes
            .values()
            .next()
            .unwrap_or(&ClipTransform::IDENTITY)
    }

    pub fn first_mut(&mut self) -> &mut ClipTransform {
        self.keyframes
            .entry(Timestamp::ZERO)
            .or_insert(ClipTransform::IDENTITY)
    }

    pub fn last(&self) -> &ClipTransform {
        self.keyframes
            .values()
            .next_back()
            .unwrap_or(&ClipTransform::IDENTITY)
    }

    pub fn get(&self, relative_position: Timestamp) -> Option<&ClipTransform> {
        self.keyframes.get(&relative_position)
    }

    /// Inserts a keyframe, replacing any at the same relative position.
    pub fn insert(&mut self, transform: ClipTransform) -> Option<ClipTransform> {
        self.keyframes
            .insert(transform.relative_position, transform)
    }

    /// Removes a keyframe. The origin keyframe can't be removed.
    pub fn remove(&mut self, relative_position: Timestamp) -> Option<ClipTransform> {
        if relative_position == Timestamp::ZERO {
            return None;
        }
        self.keyframes.remove(&relative_position)
    }

    /// Keyframe pair surrounding `relative`: the latest keyframe at or before
    /// it (clamped to the first) and the one following that (or the same one
    /// when it is the last).
    pub fn active_pair(&self, relative: Timestamp) -> (&ClipTransform, &ClipTransform) {
        let current = self
            .keyframes
            .range(..=relative)
            .next_back()
            .map(|(_, t)| t)
            .unwrap_or_else(|| self.first());
        let next = self
            .keyframes
            .range(current.relative_position..)
            .nth(1)
            .map(|(_, t)| t)
            .unwrap_or(current);
        (current, next)
    }

    /// Keyframe applied at `relative`.
    pub fn active(&self, relative: Timestamp) -> &ClipTransform {
        self.active_pair(relative).0
    }
}

impl Default for TransformSet {
    fn default() -> Self {
        Self::new(ClipTransform::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: i64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    #[test]
    fn test_new_forces_origin() {
        let set = TransformSet::new(ClipTransform::at(ms(500)).with_scale(0.5, 0.5));
        assert_eq!(set.len(), 1);
        assert_eq!(set.first().relative_position, Timestamp::ZERO);
        assert_eq!(set.first().scale_x, 0.5);
    }

    #[test]
    fn test_active_pair_picks_surrounding_keyframes() {
        let mut set = TransformSet::default();
        set.insert(ClipTransform::at(ms(1_000)).with_translate(0.25, 0.0));
        set.insert(ClipTransform::at(ms(2_000)).with_translate(0.5, 0.0));

        let (cur, next) = set.active_pair(ms(1_500));
        assert_eq!(cur.relative_position, ms(1_000));
        assert_eq!(next.relative_position, ms(2_000));

        let (cur, next) = set.active_pair(ms(5_000));
        assert_eq!(cur.relative_position, ms(2_000));
        assert_eq!(next.relative_position, ms(2_000));

        let (cur, next) = set.active_pair(ms(-100));
        assert_eq!(cur.relative_position, Timestamp::ZERO);
        assert_eq!(next.relative_position, ms(1_000));
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut set = TransformSet::default();
        set.insert(ClipTransform::at(ms(10)).with_rotation(5.0));
        let replaced = set.insert(ClipTransform::at(ms(10)).with_rotation(9.0));
        assert_eq!(replaced.map(|t| t.rotation), Some(5.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_origin_is_not_removable() {
        let mut set = TransformSet::default();
        set.insert(ClipTransform::at(ms(10)));
        assert!(set.remove(Timestamp::ZERO).is_none());
        assert!(set.remove(ms(10)).is_some());
        assert_eq!(set.len(), 1);
    }
}
