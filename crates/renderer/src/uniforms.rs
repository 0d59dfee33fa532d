use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};
use chrono::{Datelike, Local, Timelike};

use crate::compile::ParamDecl;
use crate::error::ParamError;
use crate::types::{RenderSize, UniformKind, UniformValue};

/// Sample rate advertised to shaders through `iSampleRate`.
pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;

/// CPU mirror of the `FinsFrame` block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub resolution: [f32; 4],
    pub time: f32,
    pub time_delta: f32,
    pub frame: i32,
    pub sample_rate: f32,
    pub date: [f32; 4],
}

impl FrameUniforms {
    pub fn new(size: RenderSize) -> Self {
        Self {
            resolution: [size.width as f32, size.height as f32, 1.0, 0.0],
            time: 0.0,
            time_delta: 0.0,
            frame: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            date: [0.0; 4],
        }
    }

    pub fn update(&mut self, size: RenderSize, time: f32, time_delta: f32, frame: u64) {
        self.resolution[0] = size.width as f32;
        self.resolution[1] = size.height as f32;
        self.time = time;
        self.time_delta = time_delta;
        self.frame = frame.min(i32::MAX as u64) as i32;
        self.refresh_date();
    }

    fn refresh_date(&mut self) {
        let local_now = Local::now();
        let seconds_since_midnight = local_now.num_seconds_from_midnight() as f32
            + local_now.nanosecond() as f32 / 1_000_000_000.0;
        self.date = [
            local_now.year() as f32,
            local_now.month() as f32,
            local_now.day() as f32,
            seconds_since_midnight,
        ];
    }
}

/// CPU mirror of the compositor's `Blend` block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlendUniforms {
    pub texel: [f32; 2],
    pub mix_amount: f32,
    pub blur: f32,
}

impl BlendUniforms {
    pub fn new(size: RenderSize, mix_amount: f32, blur: f32) -> Self {
        Self {
            texel: [1.0 / size.width as f32, 1.0 / size.height as f32],
            mix_amount,
            blur,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParamSlot {
    name: String,
    kind: UniformKind,
    offset: usize,
}

/// std140 offsets of a program's `FinsParams` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    slots: Vec<ParamSlot>,
    size: usize,
}

fn std140_align(kind: UniformKind) -> usize {
    match kind {
        UniformKind::Float | UniformKind::Int => 4,
        UniformKind::Vec2 => 8,
        UniformKind::Vec3 | UniformKind::Vec4 => 16,
    }
}

fn align_to(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

impl ParamLayout {
    pub fn new(params: &[ParamDecl]) -> Self {
        let mut offset = 0;
        let mut slots = Vec::with_capacity(params.len());
        for param in params {
            offset = align_to(offset, std140_align(param.kind));
            slots.push(ParamSlot {
                name: param.name.clone(),
                kind: param.kind,
                offset,
            });
            offset += param.kind.components() * 4;
        }
        // An empty block still carries its placeholder float.
        let size = align_to(offset.max(4), 16);
        Self { slots, size }
    }

    /// Byte size of the uniform buffer backing the block.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.offset)
    }

    /// Serialises `values` into block bytes.
    ///
    /// Undeclared names are skipped (reporting them is the caller's job);
    /// unset declared uniforms read as zero. Values that cannot be coerced to
    /// the declared type are left at zero and reported.
    pub fn pack(&self, values: &BTreeMap<String, UniformValue>) -> (Vec<u8>, Vec<ParamError>) {
        let mut bytes = vec![0u8; self.size];
        let mut errors = Vec::new();
        for slot in &self.slots {
            let Some(value) = values.get(&slot.name) else {
                continue;
            };
            let Some(value) = value.coerce(slot.kind) else {
                errors.push(ParamError::TypeMismatch {
                    name: slot.name.clone(),
                    declared: slot.kind,
                    given: value.kind(),
                });
                continue;
            };
            let target = &mut bytes[slot.offset..slot.offset + slot.kind.components() * 4];
            match value {
                UniformValue::Float(v) => target.copy_from_slice(bytemuck::bytes_of(&v)),
                UniformValue::Int(v) => target.copy_from_slice(bytemuck::bytes_of(&v)),
                UniformValue::Vec2(v) => target.copy_from_slice(bytemuck::cast_slice(&v)),
                UniformValue::Vec3(v) => target.copy_from_slice(bytemuck::cast_slice(&v)),
                UniformValue::Vec4(v) => target.copy_from_slice(bytemuck::cast_slice(&v)),
            }
        }
        (bytes, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, kind: UniformKind) -> ParamDecl {
        ParamDecl {
            name: name.to_string(),
            kind,
        }
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn frame_block_matches_glsl_size() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 48);
        assert_eq!(std::mem::size_of::<BlendUniforms>(), 16);
    }

    #[test]
    fn std140_offsets_follow_alignment_rules() {
        let layout = ParamLayout::new(&[
            decl("speed", UniformKind::Float),
            decl("tint", UniformKind::Vec3),
            decl("count", UniformKind::Int),
            decl("offset", UniformKind::Vec2),
            decl("glow", UniformKind::Vec4),
        ]);
        assert_eq!(layout.offset_of("speed"), Some(0));
        assert_eq!(layout.offset_of("tint"), Some(16));
        // A scalar packs into the tail of a vec3.
        assert_eq!(layout.offset_of("count"), Some(28));
        assert_eq!(layout.offset_of("offset"), Some(32));
        assert_eq!(layout.offset_of("glow"), Some(48));
        assert_eq!(layout.size(), 64);
        assert_eq!(ParamLayout::new(&[]).size(), 16);
    }

    #[test]
    fn pack_writes_values_and_reports_mismatches() {
        let layout = ParamLayout::new(&[
            decl("speed", UniformKind::Float),
            decl("tint", UniformKind::Vec3),
        ]);
        let mut values = BTreeMap::new();
        values.insert("speed".to_string(), UniformValue::Int(2));
        values.insert("tint".to_string(), UniformValue::Vec2([1.0, 1.0]));
        values.insert("unrelated".to_string(), UniformValue::Float(9.0));

        let (bytes, errors) = layout.pack(&values);
        assert_eq!(bytes.len(), 32);
        assert_eq!(read_f32(&bytes, 0), 2.0);
        assert_eq!(read_f32(&bytes, 16), 0.0);
        assert_eq!(
            errors,
            vec![ParamError::TypeMismatch {
                name: "tint".to_string(),
                declared: UniformKind::Vec3,
                given: UniformKind::Vec2,
            }]
        );
    }
}
