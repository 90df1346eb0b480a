// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Perspective camera: ray generation and world-to-canvas projection.

use cgmath::{
    EuclideanSpace as _, InnerSpace as _, Matrix4, Point2, Point3, SquareMatrix as _, Vector3,
    Vector4, Zero as _,
};

use crate::math::FreeCoordinate;
use crate::raycast::Ray;

/// Which world axis points “up” for the camera basis.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CamUp {
    Y,
    Z,
}

/// A perspective camera casting rays from `eye` through an image plane.
///
/// The plane passes through the look-at point; its half extents are derived
/// from the field-of-view parameter, and the pixel grid covers it with `(0,0)`
/// at the bottom left.
#[derive(Clone, Debug)]
pub struct PerspectiveCamera {
    eye: Point3<FreeCoordinate>,
    look_at: Point3<FreeCoordinate>,
    fov: FreeCoordinate,
    resolution: (usize, usize),
    up_axis: CamUp,

    plane_distance: FreeCoordinate,
    plane_half_width: FreeCoordinate,
    plane_half_height: FreeCoordinate,
    bottom_left: Point3<FreeCoordinate>,
    plane_base_x: Vector3<FreeCoordinate>,
    plane_base_y: Vector3<FreeCoordinate>,
    world_to_cam: Matrix4<FreeCoordinate>,
}

impl PerspectiveCamera {
    pub fn new(
        eye: Point3<FreeCoordinate>,
        look_at: Point3<FreeCoordinate>,
        fov: FreeCoordinate,
        res_x: usize,
        res_y: usize,
        up_axis: CamUp,
    ) -> Self {
        let n = (eye - look_at).normalize();
        let up = match up_axis {
            CamUp::Y => Vector3::unit_y(),
            CamUp::Z => Vector3::unit_z(),
        };
        let u = up.cross(n);
        let v = n.cross(u);
        let plane_distance = (look_at - eye).magnitude();
        let plane_half_width = (fov * std::f64::consts::PI / 180.0).tan();
        let plane_half_height = res_y as FreeCoordinate / res_x as FreeCoordinate * plane_half_width;
        let bottom_left = look_at - u * plane_half_width - v * plane_half_height;
        let plane_base_x = u * (2.0 * plane_half_width / res_x as FreeCoordinate);
        let plane_base_y = v * (2.0 * plane_half_height / res_y as FreeCoordinate);

        // Rotation into the camera basis. For a Z-up camera the vertical canvas
        // axis is the world component along `v`, but the projection reads the
        // middle row as depth, hence the swapped columns.
        let rotation = match up_axis {
            CamUp::Y => Matrix4::from_cols(
                u.extend(0.0),
                v.extend(0.0),
                n.extend(0.0),
                Vector4::unit_w(),
            ),
            CamUp::Z => Matrix4::from_cols(
                u.extend(0.0),
                n.extend(0.0),
                v.extend(0.0),
                Vector4::unit_w(),
            ),
        };
        let translation = Matrix4::from_translation(eye.to_vec());
        let world_to_cam = match (rotation.invert(), translation.invert()) {
            (Some(r_inv), Some(t_inv)) => r_inv * t_inv,
            _ => {
                log::error!("camera orientation is invalid; projections will collapse");
                Matrix4::zero()
            }
        };

        Self {
            eye,
            look_at,
            fov,
            resolution: (res_x, res_y),
            up_axis,
            plane_distance,
            plane_half_width,
            plane_half_height,
            bottom_left,
            plane_base_x,
            plane_base_y,
            world_to_cam,
        }
    }

    /// Number of pixels of the image plane in x direction.
    pub fn width(&self) -> usize {
        self.resolution.0
    }

    /// Number of pixels of the image plane in y direction.
    pub fn height(&self) -> usize {
        self.resolution.1
    }

    pub fn pixel_count(&self) -> usize {
        self.resolution.0 * self.resolution.1
    }

    pub fn eye(&self) -> Point3<FreeCoordinate> {
        self.eye
    }

    /// The ray through the image plane at pixel coordinate `(x, y)`;
    /// `(0, 0)` is bottom left.
    pub fn ray(&self, x: FreeCoordinate, y: FreeCoordinate) -> Ray {
        let plane_point = self.bottom_left + self.plane_base_x * x + self.plane_base_y * y;
        Ray::new(self.eye, plane_point - self.eye)
    }

    /// The ray through pixel `cam_index` in row-major scan order.
    pub fn ray_for_index(&self, cam_index: usize) -> Ray {
        let (x, y) = self.position_for_index(cam_index);
        self.ray(x as FreeCoordinate, y as FreeCoordinate)
    }

    /// Splits a scan-order index into `(x, y)` pixel coordinates.
    pub fn position_for_index(&self, cam_index: usize) -> (usize, usize) {
        (cam_index % self.width(), cam_index / self.width())
    }

    /// Maps a world-space point to continuous pixel coordinates on the canvas.
    pub fn project(&self, pos: Point3<FreeCoordinate>) -> Point2<FreeCoordinate> {
        let cam = self.world_to_cam * Vector4::new(pos.x, pos.y, pos.z, 1.0);
        let v_u = cam.x;
        let (v_v, v_n) = match self.up_axis {
            CamUp::Y => (cam.y, cam.z),
            CamUp::Z => (cam.z, cam.y),
        };
        let ratio = -self.plane_distance / v_n;
        let on_plane = Point2::new(
            v_u * ratio + self.plane_half_width,
            v_v * ratio + self.plane_half_height,
        );
        Point2::new(
            on_plane.x * self.width() as FreeCoordinate / (2.0 * self.plane_half_width),
            on_plane.y * self.height() as FreeCoordinate / (2.0 * self.plane_half_height),
        )
    }

    /// A camera with the same settings but `multiplier`-times the resolution.
    pub fn with_increased_resolution(&self, multiplier: usize) -> PerspectiveCamera {
        PerspectiveCamera::new(
            self.eye,
            self.look_at,
            self.fov,
            self.resolution.0 * multiplier,
            self.resolution.1 * multiplier,
            self.up_axis,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera(up: CamUp) -> PerspectiveCamera {
        PerspectiveCamera::new(
            Point3::new(1.0, -1.0, 1.9),
            Point3::new(1.0, 2.0, -1.0),
            70.0,
            150,
            50,
            up,
        )
    }

    #[test]
    fn rays_start_at_the_eye() {
        let cam = test_camera(CamUp::Z);
        for &(x, y) in &[(0.0, 0.0), (75.0, 25.0), (149.0, 49.0)] {
            let ray = cam.ray(x, y);
            assert_eq!(ray.origin(), cam.eye());
            assert!((ray.direction().magnitude() - 1.0).abs() < 1e-12);
        }
    }

    /// Projecting a point on a pixel's ray lands back on that pixel.
    #[test]
    fn project_inverts_ray() {
        for &up in &[CamUp::Y, CamUp::Z] {
            let cam = test_camera(up);
            for &(x, y) in &[(10.0, 10.0), (75.0, 25.0), (140.0, 5.0)] {
                let ray = cam.ray(x, y);
                for &t in &[1.0, 2.5, 7.0] {
                    let p = cam.project(ray.evaluate(t));
                    assert!(
                        (p.x - x).abs() < 1e-6 && (p.y - y).abs() < 1e-6,
                        "up {:?}: ({}, {}) projected to {:?}",
                        up,
                        x,
                        y,
                        p
                    );
                }
            }
        }
    }

    #[test]
    fn index_mapping_is_row_major() {
        let cam = test_camera(CamUp::Z);
        assert_eq!(cam.position_for_index(0), (0, 0));
        assert_eq!(cam.position_for_index(151), (1, 1));
        assert_eq!(cam.pixel_count(), 7500);
    }

    #[test]
    fn increased_resolution_keeps_geometry() {
        let cam = test_camera(CamUp::Z);
        let fine = cam.with_increased_resolution(3);
        assert_eq!(fine.width(), 450);
        assert_eq!(fine.height(), 150);
        // Grid corners align: the fine ray at k times a parent coordinate is the
        // parent's ray.
        let parent = cam.ray(10.0, 20.0);
        let child = fine.ray((10 * 3) as FreeCoordinate, (20 * 3) as FreeCoordinate);
        assert!((parent.direction() - child.direction()).magnitude() < 1e-12);
        assert!((parent.origin() - child.origin()).magnitude() < 1e-12);
        // Same plane, a third of the pixel pitch.
        let d = cam.ray(11.0, 20.0);
        let f = fine.ray(33.0, 60.0);
        assert!((d.direction() - f.direction()).magnitude() < 1e-12);
    }
}
