//! Spatial clip stream: clip stream with 3D position, velocity and cone

use std::path::Path;
use std::sync::Arc;

use sf_backend::{
    Attributes3d, AudioBackend, BackendResult, ChannelHandle, Mode3d, Position3d, StreamFlags,
};
use sf_core::Vec3;

use crate::{AudioResult, ClipStream};

/// Minimum distance floor
pub const MIN_DISTANCE_FLOOR: f32 = 0.1;

/// Sound cone of a directional source (degrees, gain outside)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub outer_volume: f32,
}

impl Default for Cone {
    fn default() -> Self {
        Self {
            inner_angle: 360.0,
            outer_angle: 360.0,
            outer_volume: 1.0,
        }
    }
}

/// Positioned clip stream
pub struct SpatialClipStream {
    stream: ClipStream,
    position: Vec3,
    velocity: Vec3,
    orientation: Vec3,
    min_distance: f32,
    max_distance: f32,
    cone: Cone,
    /// Frames per second used to turn a position delta into velocity
    assumed_frame_rate: f32,
    /// Set once the first position has been applied
    positioned: bool,
}

impl SpatialClipStream {
    pub fn try_load(
        backend: &Arc<dyn AudioBackend>,
        path: &Path,
        bus: ChannelHandle,
        assumed_frame_rate: f32,
    ) -> AudioResult<Self> {
        let flags = StreamFlags::decode_float().with_spatial();
        let stream = ClipStream::try_load_with(backend, path, bus, flags)?;
        let attributes = Attributes3d::default();
        Ok(Self {
            stream,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Vec3::FORWARD,
            min_distance: attributes.min_distance,
            max_distance: attributes.max_distance,
            cone: Cone::default(),
            assumed_frame_rate,
            positioned: false,
        })
    }

    /// Move the source and re-apply every 3D attribute.
    ///
    /// Distances are clamped to `min >= 0.1` and `max >= min + 0.1`. Velocity is
    /// the position delta scaled by the assumed frame rate, and zero on the
    /// first update. The new position is committed only after the backend
    /// accepted all attributes.
    pub fn update_3d_position(&mut self, position: Vec3, min_distance: f32, max_distance: f32) {
        let min_distance = min_distance.max(MIN_DISTANCE_FLOOR);
        let max_distance = max_distance.max(min_distance + MIN_DISTANCE_FLOOR);
        let velocity = if self.positioned {
            (position - self.position) * self.assumed_frame_rate
        } else {
            Vec3::ZERO
        };

        match self.apply(position, velocity, min_distance, max_distance) {
            Ok(()) => {
                self.positioned = true;
                self.position = position;
                self.velocity = velocity;
                self.min_distance = min_distance;
                self.max_distance = max_distance;
            }
            Err(e) => {
                log::warn!(
                    "[SpatialClipStream] 3D update failed for {}: {}",
                    self.stream.path().display(),
                    e
                );
            }
        }
    }

    fn apply(
        &self,
        position: Vec3,
        velocity: Vec3,
        min_distance: f32,
        max_distance: f32,
    ) -> BackendResult<()> {
        let backend = self.stream.backend();
        let handle = self.stream.handle();

        backend.set_3d_attributes(
            handle,
            &Attributes3d {
                mode: Mode3d::Normal,
                min_distance,
                max_distance,
                inner_angle: self.cone.inner_angle,
                outer_angle: self.cone.outer_angle,
                outer_volume: self.cone.outer_volume,
            },
        )?;
        backend.set_3d_position(
            handle,
            &Position3d {
                position,
                orientation: self.orientation,
                velocity,
            },
        )?;
        backend.apply_3d();
        Ok(())
    }

    /// Facing direction, applied on the next position update
    pub fn set_orientation(&mut self, orientation: Vec3) {
        self.orientation = orientation.normalize();
    }

    /// Cone, applied on the next position update
    pub fn set_cone(&mut self, cone: Cone) {
        self.cone = cone;
    }

    pub fn stream(&self) -> &ClipStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut ClipStream {
        &mut self.stream
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn orientation(&self) -> Vec3 {
        self.orientation
    }

    pub fn distances(&self) -> (f32, f32) {
        (self.min_distance, self.max_distance)
    }

    pub fn cone(&self) -> Cone {
        self.cone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sf_backend::SoftwareBackend;

    fn spatial_fixture() -> (tempfile::TempDir, Arc<SoftwareBackend>, SpatialClipStream) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emitter.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4800 {
            writer.write_sample(1.0f32).unwrap();
        }
        writer.finalize().unwrap();

        let software = Arc::new(SoftwareBackend::headless());
        software.init_device(48000, 1).unwrap();
        let bus = software.create_mixer(48000, 1, true).unwrap();
        let backend: Arc<dyn AudioBackend> = software.clone();
        let stream = SpatialClipStream::try_load(&backend, &path, bus, 60.0).unwrap();
        (dir, software, stream)
    }

    #[test]
    fn test_velocity_from_position_delta() {
        let (_dir, _backend, mut stream) = spatial_fixture();
        stream.update_3d_position(Vec3::new(1.0, 0.0, 0.0), 1.0, 10.0);
        stream.update_3d_position(Vec3::new(1.5, 0.0, 0.0), 1.0, 10.0);

        assert_relative_eq!(stream.velocity().x, 30.0);
        assert_relative_eq!(stream.position().x, 1.5);
    }

    #[test]
    fn test_first_position_has_no_velocity() {
        let (_dir, _backend, mut stream) = spatial_fixture();
        stream.update_3d_position(Vec3::new(100.0, 0.0, 0.0), 1.0, 10.0);

        assert_eq!(stream.velocity(), Vec3::ZERO);
        assert_relative_eq!(stream.position().x, 100.0);

        stream.update_3d_position(Vec3::new(101.0, 0.0, 0.0), 1.0, 10.0);
        assert_relative_eq!(stream.velocity().x, 60.0);
    }

    #[test]
    fn test_distance_clamping() {
        let (_dir, _backend, mut stream) = spatial_fixture();
        stream.update_3d_position(Vec3::ZERO, 0.0, 0.0);
        let (min, max) = stream.distances();
        assert_relative_eq!(min, 0.1);
        assert_relative_eq!(max, 0.2);
    }

    #[test]
    fn test_attenuation_reaches_mix() {
        let (_dir, backend, mut stream) = spatial_fixture();
        let bus = stream.stream().bus();
        stream.stream_mut().play();
        stream.update_3d_position(Vec3::new(0.0, 0.0, 2.0), 1.0, 100.0);

        let mixed = backend.read_data(bus, 4).unwrap().to_f32();
        assert_relative_eq!(mixed[0], 0.5);
    }
}
