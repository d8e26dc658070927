//! Conversion between the engine's axis convention and the editor's.
use glam::{vec3, vec4, Mat3, Mat4, Vec3};

/// The fixed axis conversion between engine space and editor space.
///
/// The matrix is an involution: it equals both its inverse and its
/// transpose, so decode and encode apply the same matrix.
pub const RIGHT_HAND: Mat4 = Mat4::from_cols(
    vec4(-1.0, 0.0, 0.0, 0.0),
    vec4(0.0, -1.0, 0.0, 0.0),
    vec4(0.0, 0.0, -1.0, 0.0),
    vec4(0.0, 0.0, 0.0, 1.0),
);

/// Joint matrices are stored pre-scaled by -1 on all three axes.
const NEGATIVE_SCALE: Mat4 = Mat4::from_cols(
    vec4(-1.0, 0.0, 0.0, 0.0),
    vec4(0.0, -1.0, 0.0, 0.0),
    vec4(0.0, 0.0, -1.0, 0.0),
    vec4(0.0, 0.0, 0.0, 1.0),
);

pub fn position_to_editor(position: Vec3) -> Vec3 {
    RIGHT_HAND.transform_point3(position)
}

pub fn position_to_engine(position: Vec3) -> Vec3 {
    // RIGHT_HAND is its own inverse.
    position_to_editor(position)
}

pub fn normal_to_editor(normal: Vec3) -> Vec3 {
    RIGHT_HAND.transform_vector3(normal)
}

pub fn normal_to_engine(normal: Vec3) -> Vec3 {
    normal_to_editor(normal)
}

/// Convert a stored joint matrix to an editor space bind matrix.
///
/// The 12 floats are a row major 3x3 rotation followed by a translation.
/// The stored value is an already inverted, pre-scaled bind pose, so the
/// editor matrix is `RIGHT_HAND * (scale(-1) * rotation * translation) * RIGHT_HAND`.
pub fn joint_matrix_to_editor(raw: &[f32; 12]) -> Mat4 {
    let rotation = Mat3::from_cols(
        vec3(raw[0], raw[3], raw[6]),
        vec3(raw[1], raw[4], raw[7]),
        vec3(raw[2], raw[5], raw[8]),
    );
    let translation = vec3(raw[9], raw[10], raw[11]);
    let stored = Mat4::from_mat3(rotation) * Mat4::from_translation(translation);
    RIGHT_HAND * (NEGATIVE_SCALE * stored) * RIGHT_HAND
}

/// Recover the stored rotation and translation from an editor space bind
/// matrix, inverting [joint_matrix_to_editor].
pub fn joint_matrix_to_engine(matrix: Mat4) -> [f32; 12] {
    let stored = NEGATIVE_SCALE * (RIGHT_HAND * matrix * RIGHT_HAND);
    let rotation = Mat3::from_mat4(stored);
    // The stored translation column is rotation * translation.
    let translation = rotation.transpose() * stored.w_axis.truncate();
    let r0 = rotation.row(0);
    let r1 = rotation.row(1);
    let r2 = rotation.row(2);
    [
        r0.x,
        r0.y,
        r0.z,
        r1.x,
        r1.y,
        r1.z,
        r2.x,
        r2.y,
        r2.z,
        translation.x,
        translation.y,
        translation.z,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_conversion_is_an_involution() {
        let position = vec3(1.5, -2.0, 0.25);
        assert_eq!(
            position,
            position_to_editor(position_to_engine(position))
        );
        assert_eq!(vec3(-1.5, 2.0, -0.25), position_to_editor(position));
    }

    #[test]
    fn normal_conversion_flips_axes() {
        assert_eq!(vec3(0.0, -1.0, 0.0), normal_to_editor(vec3(0.0, 1.0, 0.0)));
    }

    #[test]
    fn joint_matrix_round_trip_identity_rotation() {
        let raw = [
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.5, 0.25, -1.0,
        ];
        assert_eq!(raw, joint_matrix_to_engine(joint_matrix_to_editor(&raw)));
    }

    #[test]
    fn joint_matrix_round_trip_permutation_rotation() {
        // An axis permutation with determinant one stays exact in float math.
        let raw = [
            0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 3.0, -2.0, 0.5,
        ];
        assert_eq!(raw, joint_matrix_to_engine(joint_matrix_to_editor(&raw)));
    }

    #[test]
    fn joint_matrix_round_trip_arbitrary_rotation() {
        // A general rotation accumulates float rounding in the translation
        // recovery, but stays well within float32 tolerance.
        let (sin, cos) = (0.5f32, 0.8660254f32);
        let raw = [
            cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0, 0.1, 0.2, 0.3,
        ];
        let round_trip = joint_matrix_to_engine(joint_matrix_to_editor(&raw));
        for (expected, actual) in raw.iter().zip(&round_trip) {
            approx::assert_relative_eq!(*expected, *actual, epsilon = 1e-5);
        }
    }

    #[test]
    fn joint_matrix_translation_sign() {
        // For the identity rotation the scale and the trailing axis swap
        // cancel on the translation column, leaving it unchanged.
        let raw = [
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 3.0,
        ];
        let matrix = joint_matrix_to_editor(&raw);
        assert_eq!(vec3(1.0, 2.0, 3.0), matrix.w_axis.truncate());
    }
}
