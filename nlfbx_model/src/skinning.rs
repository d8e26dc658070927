//! Conversion between packed per vertex skinning data and per bone
//! influences.
//!
//! Influences reference bones by name so they survive palette reordering.
//! Consuming code can create its own mappings from names to indices.
use glam::Vec4;
use log::warn;

use crate::error::CreateModelError;

#[derive(Debug, PartialEq, Clone)]
pub struct Influence {
    pub bone_name: String,
    pub weights: Vec<VertexWeight>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct VertexWeight {
    pub vertex_index: u32,
    pub weight: f32,
}

/// Convert per vertex indices and weights to per bone influences.
/// The `bone_names` define the mapping from bone indices to names.
pub fn weights_to_influences(
    bone_indices: &[[u16; 4]],
    skin_weights: &[Vec4],
    bone_names: &[String],
) -> Vec<Influence> {
    let mut influences: Vec<_> = bone_names
        .iter()
        .map(|name| Influence {
            bone_name: name.clone(),
            weights: Vec::new(),
        })
        .collect();

    for (vertex_index, (indices, weights)) in bone_indices.iter().zip(skin_weights).enumerate() {
        for i in 0..4 {
            let weight = weights[i];
            if weight > 0.0 {
                match influences.get_mut(indices[i] as usize) {
                    Some(influence) => influence.weights.push(VertexWeight {
                        vertex_index: vertex_index as u32,
                        weight,
                    }),
                    None => warn!(
                        "bone index {} is out of range for {} joints",
                        indices[i],
                        bone_names.len()
                    ),
                }
            }
        }
    }

    influences
}

/// Convert per bone influences to per vertex indices and weights.
///
/// Every influence on a vertex is gathered first and only the strongest
/// four are kept, sorted by weight descending and zero padded.
pub fn influences_to_weights(
    influences: &[Influence],
    vertex_count: usize,
    bone_names: &[String],
) -> Result<(Vec<[u16; 4]>, Vec<Vec4>), CreateModelError> {
    let mut per_vertex: Vec<Vec<(u16, f32)>> = vec![Vec::new(); vertex_count];
    for influence in influences {
        let bone_index = bone_names
            .iter()
            .position(|name| name == &influence.bone_name)
            .ok_or_else(|| CreateModelError::MissingBone {
                name: influence.bone_name.clone(),
            })?;
        for weight in &influence.weights {
            match per_vertex.get_mut(weight.vertex_index as usize) {
                Some(entries) => entries.push((bone_index as u16, weight.weight)),
                None => warn!(
                    "skipping weight for vertex {} outside the mesh",
                    weight.vertex_index
                ),
            }
        }
    }

    let mut indices = vec![[0u16; 4]; vertex_count];
    let mut weights = vec![Vec4::ZERO; vertex_count];
    for (i, mut entries) in per_vertex.into_iter().enumerate() {
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries.truncate(4);
        for (slot, (bone_index, weight)) in entries.into_iter().enumerate() {
            indices[i][slot] = bone_index;
            weights[i][slot] = weight;
        }
    }

    Ok((indices, weights))
}

/// Quantize four descending weights so the stored bytes sum to exactly 255.
///
/// Each weight becomes `round(w / total * 255)` and the rounding remainder
/// is added to the first, largest weight.
pub fn quantize_weights(weights: Vec4) -> [u8; 4] {
    let total = weights.element_sum();
    if total <= 0.0 {
        return [0; 4];
    }
    let mut quantized = [0i32; 4];
    for i in 0..4 {
        quantized[i] = ((weights[i] / total) * 255.0).round() as i32;
    }
    let sum: i32 = quantized.iter().sum();
    quantized[0] += 255 - sum;
    quantized.map(|q| q.clamp(0, 255) as u8)
}
