//! A procedural stand-in for a full character engine.
//!
//! A mannequin is three boxes (`body`, `head`, `weapon`) rigidly bound to a
//! three bone skeleton. Each clip is a closed-form pose function, so the
//! model has everything the crowd drives (clips, playback speed, part
//! visibility, per-part update modes and both skinning paths) without an
//! animation file format.
//!
//! A character file names the diffuse texture and the clips it exposes:
//!
//! ```text
//! # mannequin
//! texture = textures/mannequin.png
//! clips = stand fight walk run attack
//! ```

use std::{
    cell::Cell,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Quaternion, Rad, Rotation3, Vector3};

use crate::{
    config::AssetPaths,
    data_structures::{
        instance::Transform,
        vertex::{BlendVertex, MeshVertex, UvVertex},
    },
    device::{EffectValue, GraphicsDevice, ResourceHandle, params},
    error::{DeviceError, ModelError},
    model::{CharacterModel, DrawContext, LodSettings, MeshUpdateMode, ModelFactory, Playback, UpdateFlags},
    skinning::SkinningMode,
};

pub const BONE_COUNT: usize = 3;
const ROOT: u8 = 0;
const HEAD: u8 = 1;
const WEAPON: u8 = 2;

const NECK: [f32; 3] = [0.0, 0.0, 0.7];
const SHOULDER: [f32; 3] = [0.18, 0.0, 0.65];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Clip {
    Stand,
    Fight,
    Walk,
    Run,
    Attack,
}

/// Joint angles and offsets of one sampled pose.
#[derive(Clone, Copy, Debug, Default)]
struct Pose {
    bob: f32,
    lean: f32,
    turn: f32,
    nod: f32,
    swing: f32,
}

impl Clip {
    fn from_name(name: &str) -> Option<Clip> {
        match name {
            "stand" => Some(Clip::Stand),
            "fight" => Some(Clip::Fight),
            "walk" => Some(Clip::Walk),
            "run" => Some(Clip::Run),
            "attack" => Some(Clip::Attack),
            _ => None,
        }
    }

    /// Length of one cycle in seconds.
    fn duration(self) -> f32 {
        match self {
            Clip::Stand => 3.0,
            Clip::Fight => 1.5,
            Clip::Walk => 1.0,
            Clip::Run => 0.6,
            Clip::Attack => 1.2,
        }
    }

    fn sample(self, t: f32) -> Pose {
        let phase = std::f32::consts::TAU * t / self.duration();
        match self {
            Clip::Stand => Pose {
                bob: 0.01 * phase.sin(),
                nod: 0.05 * phase.sin(),
                ..Default::default()
            },
            Clip::Fight => Pose {
                turn: 0.25 * phase.sin(),
                swing: 0.6 * (2.0 * phase).sin(),
                ..Default::default()
            },
            Clip::Walk => Pose {
                bob: 0.03 * (2.0 * phase).sin().abs(),
                nod: 0.08 * (2.0 * phase).sin(),
                swing: 0.3 * phase.sin(),
                ..Default::default()
            },
            Clip::Run => Pose {
                bob: 0.08 * (2.0 * phase).sin().abs(),
                lean: 0.25,
                swing: 0.7 * phase.sin(),
                ..Default::default()
            },
            Clip::Attack => Pose {
                lean: 0.15 * phase.sin().max(0.0),
                swing: -1.4 * phase.sin().max(0.0),
                ..Default::default()
            },
        }
    }
}

/// `rotation` applied about `pivot` instead of the origin.
fn pivoted(pivot: [f32; 3], rotation: Quaternion<f32>) -> Transform {
    let pivot = Vector3::from(pivot);
    Transform {
        position: pivot - rotation * pivot,
        rotation,
        scale: 1.0,
    }
}

fn palette_for(pose: Pose) -> [Transform; BONE_COUNT] {
    let root = Transform {
        position: Vector3::new(0.0, 0.0, pose.bob),
        rotation: Quaternion::from_angle_z(Rad(pose.turn)) * Quaternion::from_angle_x(Rad(pose.lean)),
        scale: 1.0,
    };
    let head = &root * &pivoted(NECK, Quaternion::from_angle_x(Rad(pose.nod)));
    let weapon = &root * &pivoted(SHOULDER, Quaternion::from_angle_x(Rad(pose.swing)));
    [root, head, weapon]
}

#[derive(Clone, Debug, PartialEq)]
struct PartRange {
    name: &'static str,
    first: u32,
    count: u32,
}

/// Bind pose geometry shared by every mannequin.
#[derive(Debug)]
pub struct MannequinMesh {
    vertices: Vec<MeshVertex>,
    uvs: Vec<UvVertex>,
    blend: Vec<BlendVertex>,
    parts: Vec<PartRange>,
}

impl MannequinMesh {
    pub fn build() -> Self {
        let mut mesh = Self {
            vertices: Vec::new(),
            uvs: Vec::new(),
            blend: Vec::new(),
            parts: Vec::new(),
        };
        mesh.push_part("body", ROOT, [0.0, 0.0, 0.35], [0.12, 0.08, 0.35]);
        mesh.push_part("head", HEAD, [0.0, 0.0, 0.8], [0.09, 0.09, 0.1]);
        mesh.push_part("weapon", WEAPON, [0.2, 0.0, 0.4], [0.02, 0.02, 0.3]);
        mesh
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    fn part(&self, name: &str) -> Option<usize> {
        self.parts.iter().position(|p| p.name == name)
    }

    fn push_part(&mut self, name: &'static str, bone: u8, center: [f32; 3], half: [f32; 3]) {
        let first = self.vertices.len() as u32;
        let center = Vector3::from(center);
        for axis in 0..3 {
            for sign in [1.0f32, -1.0] {
                let mut normal = Vector3::new(0.0, 0.0, 0.0);
                normal[axis] = sign;
                let mut tangent = Vector3::new(0.0, 0.0, 0.0);
                tangent[(axis + 1) % 3] = 1.0;
                let binormal = normal.cross(tangent);

                let face = center + normal * half[axis];
                let t = tangent * half[(axis + 1) % 3];
                let b = binormal * half[(axis + 2) % 3];
                let corners = [
                    (face - t - b, [0.0, 1.0]),
                    (face + t - b, [1.0, 1.0]),
                    (face + t + b, [1.0, 0.0]),
                    (face - t + b, [0.0, 0.0]),
                ];
                for k in [0, 1, 2, 0, 2, 3] {
                    let (position, uv) = corners[k];
                    self.vertices.push(MeshVertex {
                        position: position.into(),
                        normal: normal.into(),
                        tangent: tangent.into(),
                        binormal: binormal.into(),
                    });
                    self.uvs.push(UvVertex { tex_coords: uv });
                    self.blend.push(BlendVertex::rigid(bone));
                }
            }
        }
        self.parts.push(PartRange {
            name,
            first,
            count: self.vertices.len() as u32 - first,
        });
    }
}

/// Parsed character file.
#[derive(Clone, Debug, PartialEq)]
struct CharacterDefinition {
    texture: PathBuf,
    clips: Vec<String>,
}

impl CharacterDefinition {
    fn parse(path: &Path, text: &str, assets: &AssetPaths) -> Result<Self, ModelError> {
        let load_error = |details: String| ModelError::Load {
            path: path.to_path_buf(),
            details,
        };
        let mut texture = None;
        let mut clips = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(load_error(format!("line {}: expected 'key = value'", number + 1)));
            };
            match key.trim() {
                "texture" => texture = Some(assets.resolve(value.trim())),
                "clips" => {
                    for clip in value.split_whitespace() {
                        if Clip::from_name(clip).is_none() {
                            return Err(load_error(format!("no motion for clip '{}'", clip)));
                        }
                        clips.push(clip.to_string());
                    }
                }
                other => return Err(load_error(format!("unknown key '{}'", other))),
            }
        }
        let texture = texture.ok_or_else(|| load_error("missing 'texture' entry".to_string()))?;
        Ok(Self { texture, clips })
    }
}

pub struct Mannequin {
    mesh: Arc<MannequinMesh>,
    clips: Vec<String>,
    texture: ResourceHandle,
    stream_buffers: [ResourceHandle; 3],
    world: Matrix4<f32>,
    lod: Option<LodSettings>,
    clip: Clip,
    playback: Playback,
    time_scale: f32,
    clock: f32,
    visible: Vec<bool>,
    update_modes: Vec<MeshUpdateMode>,
    skinning_mode: SkinningMode,
    palette: [Transform; BONE_COUNT],
    skinned: Vec<MeshVertex>,
    bounds: Option<(Point3<f32>, Point3<f32>)>,
    /// Stream 0 holds skinned vertices and must be reset to the bind pose
    /// before the next GPU skinned draw.
    bind_pose_pending: Cell<bool>,
}

impl std::fmt::Debug for Mannequin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mannequin")
            .field("clip", &self.clip)
            .field("playback", &self.playback)
            .field("time_scale", &self.time_scale)
            .field("clock", &self.clock)
            .field("skinning_mode", &self.skinning_mode)
            .finish_non_exhaustive()
    }
}

impl Mannequin {
    pub fn clock(&self) -> f32 {
        self.clock
    }

    pub fn lod(&self) -> Option<LodSettings> {
        self.lod
    }

    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        self.bounds
    }

    pub fn is_part_visible(&self, part: &str) -> Option<bool> {
        self.mesh.part(part).map(|i| self.visible[i])
    }

    fn part_index(&self, part: &str) -> Result<usize, ModelError> {
        self.mesh
            .part(part)
            .ok_or_else(|| ModelError::PartNotFound(part.to_string()))
    }

    fn palette_matrices(&self) -> Vec<Matrix4<f32>> {
        self.palette.iter().map(Transform::to_matrix).collect()
    }

    fn pose(&mut self) {
        self.palette = palette_for(self.clip.sample(self.clock));
    }

    /// Deforms every visible part on the host.
    fn skin(&mut self) {
        let matrices = self.palette_matrices();
        let mesh = Arc::clone(&self.mesh);
        for (index, part) in mesh.parts.iter().enumerate() {
            if !self.visible[index] {
                continue;
            }
            let tangents = self.update_modes[index] == MeshUpdateMode::Full;
            let range = part.first as usize..(part.first + part.count) as usize;
            for v in range {
                let source = &mesh.vertices[v];
                let blend = &mesh.blend[v];
                let target = &mut self.skinned[v];
                target.position = blend_point(&matrices, blend, source.position).into();
                target.normal = blend_vector(&matrices, blend, source.normal).into();
                if tangents {
                    target.tangent = blend_vector(&matrices, blend, source.tangent).into();
                    target.binormal = blend_vector(&matrices, blend, source.binormal).into();
                }
            }
        }
    }

    fn compute_bounds(&mut self) {
        let matrices = self.palette_matrices();
        let mut min = Point3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Point3::new(f32::MIN, f32::MIN, f32::MIN);
        for (index, part) in self.mesh.parts.iter().enumerate() {
            if !self.visible[index] {
                continue;
            }
            let range = part.first as usize..(part.first + part.count) as usize;
            for v in range {
                let p = blend_point(&matrices, &self.mesh.blend[v], self.mesh.vertices[v].position);
                min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
                max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
            }
        }
        self.bounds = (min.x <= max.x).then_some((min, max));
    }
}

fn blend_point(matrices: &[Matrix4<f32>], blend: &BlendVertex, p: [f32; 3]) -> Point3<f32> {
    use cgmath::Transform as _;
    let p = Point3::from(p);
    let mut sum = Vector3::new(0.0, 0.0, 0.0);
    for (bone, weight) in blend.indices.iter().zip(blend.weights) {
        if weight > 0.0 {
            sum += matrices[*bone as usize].transform_point(p).to_vec() * weight;
        }
    }
    Point3::from_vec(sum)
}

fn blend_vector(matrices: &[Matrix4<f32>], blend: &BlendVertex, v: [f32; 3]) -> Vector3<f32> {
    use cgmath::Transform as _;
    let v = Vector3::from(v);
    let mut sum = Vector3::new(0.0, 0.0, 0.0);
    for (bone, weight) in blend.indices.iter().zip(blend.weights) {
        if weight > 0.0 {
            sum += matrices[*bone as usize].transform_vector(v) * weight;
        }
    }
    if sum.magnitude2() > 0.0 { sum.normalize() } else { sum }
}

impl CharacterModel for Mannequin {
    fn set_transform(&mut self, world: Matrix4<f32>) {
        self.world = world;
    }

    fn set_lod(&mut self, lod: LodSettings) {
        self.lod = Some(lod);
    }

    fn clip_names(&self) -> Vec<String> {
        self.clips.clone()
    }

    fn play_animation(
        &mut self,
        clip: &str,
        playback: Playback,
        time_scale: f32,
    ) -> Result<(), ModelError> {
        let motion = self
            .clips
            .iter()
            .any(|c| c == clip)
            .then(|| Clip::from_name(clip))
            .flatten()
            .ok_or_else(|| ModelError::ClipNotFound(clip.to_string()))?;
        self.clip = motion;
        self.playback = playback;
        self.time_scale = time_scale;
        self.clock = 0.0;
        self.pose();
        Ok(())
    }

    fn set_part_visible(&mut self, part: &str, visible: bool) -> Result<(), ModelError> {
        let index = self.part_index(part)?;
        self.visible[index] = visible;
        Ok(())
    }

    fn set_part_update_mode(
        &mut self,
        part: &str,
        mode: MeshUpdateMode,
    ) -> Result<(), ModelError> {
        let index = self.part_index(part)?;
        self.update_modes[index] = mode;
        Ok(())
    }

    fn set_skinning_mode(&mut self, mode: SkinningMode) {
        if self.skinning_mode == mode {
            return;
        }
        self.skinning_mode = mode;
        match mode {
            SkinningMode::Gpu => self.bind_pose_pending.set(true),
            SkinningMode::Cpu => self.skin(),
        }
    }

    fn skinning_mode(&self) -> SkinningMode {
        self.skinning_mode
    }

    fn update(&mut self, _time: f64, elapsed: f32, flags: UpdateFlags) {
        let duration = self.clip.duration();
        self.clock += elapsed * self.time_scale;
        self.clock = match self.playback {
            Playback::Loop => self.clock.rem_euclid(duration),
            Playback::Once => self.clock.min(duration),
        };
        self.pose();
        if self.skinning_mode == SkinningMode::Cpu {
            self.skin();
        }
        if !flags.contains(UpdateFlags::NO_BOUNDING_BOX) {
            self.compute_bounds();
        }
    }

    fn render(
        &self,
        device: &mut dyn GraphicsDevice,
        effect: ResourceHandle,
        ctx: &DrawContext,
    ) -> Result<(), ModelError> {
        let [positions, uvs, blend] = self.stream_buffers;
        match self.skinning_mode {
            SkinningMode::Cpu => {
                device.write_vertex_buffer(positions, bytemuck::cast_slice(&self.skinned))?;
            }
            SkinningMode::Gpu => {
                if self.bind_pose_pending.replace(false) {
                    device.write_vertex_buffer(positions, bytemuck::cast_slice(&self.mesh.vertices))?;
                }
                device.set_effect_param(
                    effect,
                    params::BONE_PALETTE,
                    EffectValue::MatrixArray(self.palette_matrices()),
                )?;
            }
        }

        if ctx.commit_shared {
            device.set_effect_param(
                effect,
                params::VIEW_PROJECTION,
                EffectValue::Matrix(ctx.view_projection()),
            )?;
        }
        device.set_effect_param(effect, params::WORLD, EffectValue::Matrix(self.world))?;
        if ctx.diffuse_map_enabled {
            device.set_effect_param(effect, params::DIFFUSE_TEXTURE, EffectValue::Texture(self.texture))?;
        }

        device.set_stream_source(0, positions, MeshVertex::STRIDE)?;
        device.set_stream_source(1, uvs, UvVertex::STRIDE)?;
        if self.skinning_mode.is_gpu() {
            device.set_stream_source(2, blend, BlendVertex::STRIDE)?;
        }
        device.commit_changes(effect)?;

        for (part, visible) in self.mesh.parts.iter().zip(&self.visible) {
            if *visible {
                device.draw_triangles(part.first, part.count)?;
            }
        }
        Ok(())
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for buffer in self.stream_buffers {
            if let Err(e) = device.release(buffer) {
                log::warn!("failed to release mannequin stream: {}", e);
            }
        }
    }
}

/// Creates [`Mannequin`]s that share one mesh and one diffuse texture.
pub struct MannequinFactory {
    assets: AssetPaths,
    mesh: Arc<MannequinMesh>,
    definitions: HashMap<PathBuf, CharacterDefinition>,
    texture: Option<ResourceHandle>,
}

impl MannequinFactory {
    pub fn new(assets: AssetPaths) -> Self {
        Self {
            assets,
            mesh: Arc::new(MannequinMesh::build()),
            definitions: HashMap::new(),
            texture: None,
        }
    }

    fn definition(&mut self, path: &Path, source: &[u8]) -> Result<CharacterDefinition, ModelError> {
        if let Some(definition) = self.definitions.get(path) {
            return Ok(definition.clone());
        }
        let text = std::str::from_utf8(source).map_err(|e| ModelError::Load {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        let definition = CharacterDefinition::parse(path, text, &self.assets)?;
        log::debug!("loaded character definition {}", path.display());
        self.definitions.insert(path.to_path_buf(), definition.clone());
        Ok(definition)
    }

    fn texture(
        &mut self,
        definition: &CharacterDefinition,
        device: &mut dyn GraphicsDevice,
    ) -> Result<ResourceHandle, DeviceError> {
        match self.texture {
            Some(texture) => Ok(texture),
            None => {
                let texture = device.create_texture(&definition.texture)?;
                self.texture = Some(texture);
                Ok(texture)
            }
        }
    }

    fn create_streams(
        &self,
        device: &mut dyn GraphicsDevice,
    ) -> Result<[ResourceHandle; 3], DeviceError> {
        let mesh = &self.mesh;
        let streams: [&[u8]; 3] = [
            bytemuck::cast_slice(&mesh.vertices),
            bytemuck::cast_slice(&mesh.uvs),
            bytemuck::cast_slice(&mesh.blend),
        ];
        let mut created = Vec::with_capacity(streams.len());
        for data in streams {
            let result = device
                .create_vertex_buffer(data.len() as u64)
                .and_then(|buffer| {
                    created.push(buffer);
                    device.write_vertex_buffer(buffer, data)
                });
            if let Err(e) = result {
                for buffer in created {
                    if let Err(e) = device.release(buffer) {
                        log::warn!("failed to release partial mannequin stream: {}", e);
                    }
                }
                return Err(e);
            }
        }
        Ok([created[0], created[1], created[2]])
    }
}

impl ModelFactory for MannequinFactory {
    fn create(
        &mut self,
        path: &Path,
        source: &[u8],
        device: &mut dyn GraphicsDevice,
    ) -> Result<Box<dyn CharacterModel>, ModelError> {
        let definition = self.definition(path, source)?;
        let texture = self.texture(&definition, device)?;
        let stream_buffers = self.create_streams(device)?;
        let parts = self.mesh.parts.len();
        let mut model = Mannequin {
            mesh: Arc::clone(&self.mesh),
            clips: definition.clips,
            texture,
            stream_buffers,
            world: Transform::new().to_matrix(),
            lod: None,
            clip: Clip::Stand,
            playback: Playback::Loop,
            time_scale: 1.0,
            clock: 0.0,
            visible: vec![true; parts],
            update_modes: vec![MeshUpdateMode::Full; parts],
            skinning_mode: SkinningMode::Cpu,
            palette: palette_for(Pose::default()),
            skinned: self.mesh.vertices.clone(),
            bounds: None,
            bind_pose_pending: Cell::new(false),
        };
        model.skin();
        Ok(Box::new(model))
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(texture) = self.texture.take() {
            if let Err(e) = device.release(texture) {
                log::warn!("failed to release character texture: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const DEFINITION: &str = "# test\ntexture = textures/mannequin.png\nclips = stand walk\n";

    fn definition() -> CharacterDefinition {
        CharacterDefinition::parse(
            Path::new("test.chr"),
            DEFINITION,
            &AssetPaths::with_roots(vec![PathBuf::from("assets")]),
        )
        .unwrap()
    }

    #[test]
    fn should_build_three_closed_boxes() {
        let mesh = MannequinMesh::build();
        assert_eq!(mesh.parts.len(), 3);
        assert_eq!(mesh.vertex_count(), 3 * 36);
        assert_eq!(mesh.uvs.len(), mesh.vertices.len());
        assert_eq!(mesh.blend.len(), mesh.vertices.len());
        assert!(mesh.part("weapon").is_some());
    }

    #[test]
    fn should_point_face_normals_out_of_the_box() {
        let mesh = MannequinMesh::build();
        let body = &mesh.parts[0];
        let center = Vector3::new(0.0, 0.0, 0.35);
        for v in &mesh.vertices[body.first as usize..(body.first + body.count) as usize] {
            let out = Vector3::from(v.position) - center;
            assert!(out.dot(Vector3::from(v.normal)) > 0.0);
        }
    }

    #[test]
    fn should_parse_character_definition() {
        let definition = definition();
        assert_eq!(definition.texture, PathBuf::from("assets/textures/mannequin.png"));
        assert_eq!(definition.clips, vec!["stand", "walk"]);
    }

    #[test]
    fn should_read_definition_from_streamed_bytes() {
        let mut factory =
            MannequinFactory::new(AssetPaths::with_roots(vec![PathBuf::from("assets")]));
        let definition = factory
            .definition(Path::new("streamed.chr"), DEFINITION.as_bytes())
            .unwrap();
        assert_eq!(definition.clips, vec!["stand", "walk"]);

        let err = factory
            .definition(Path::new("binary.chr"), &[0xff, 0xfe, 0x00])
            .unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }));
    }

    #[test]
    fn should_reject_clip_without_motion() {
        let err = CharacterDefinition::parse(
            Path::new("bad.chr"),
            "texture = a.png\nclips = stand dance\n",
            &AssetPaths::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }));
    }

    #[test]
    fn should_keep_bind_pose_for_rest_pose() {
        let palette = palette_for(Pose::default());
        for bone in palette {
            assert_relative_eq!(bone.position.magnitude(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn should_rotate_weapon_around_shoulder() {
        let palette = palette_for(Pose {
            swing: 1.0,
            ..Default::default()
        });
        let matrices: Vec<_> = palette.iter().map(Transform::to_matrix).collect();
        let p = blend_point(&matrices, &BlendVertex::rigid(WEAPON), SHOULDER);
        assert_relative_eq!(p.x, SHOULDER[0], epsilon = 1e-5);
        assert_relative_eq!(p.y, SHOULDER[1], epsilon = 1e-5);
        assert_relative_eq!(p.z, SHOULDER[2], epsilon = 1e-5);
    }

    #[test]
    fn should_loop_clips() {
        for clip in [Clip::Stand, Clip::Fight, Clip::Walk, Clip::Run, Clip::Attack] {
            let a = clip.sample(0.0);
            let b = clip.sample(clip.duration());
            assert_relative_eq!(a.swing, b.swing, epsilon = 1e-4);
            assert_relative_eq!(a.bob, b.bob, epsilon = 1e-4);
        }
    }
}
