//! Device-resource lifecycle.
//!
//! The presentation framework notifies the application when the graphics
//! device is created, reset, lost and destroyed. [`ResourceLifecycleTracker`]
//! mirrors those notifications and keeps two resource sets:
//!
//! - [`CreatedPhaseResources`] live from `Created` until `Destroyed`
//!   (font, shader effect, vertex layouts)
//! - [`DefaultPhaseResources`] live from `Reset` until the matching `Lost`
//!   (floor vertex buffer, text sprite, floor texture)
//!
//! The only accepted call sequence is
//! `Uninitialized → Created → Reset → (Lost → Reset)* → Destroyed`.
//! Anything else is rejected with a [`LifecycleError`] and leaves the tracker
//! untouched.

use std::path::PathBuf;

use crate::{
    device::{
        BackBufferDesc, EffectValue, FontDesc, GraphicsDevice, ResourceHandle, VertexLayoutKind,
        params,
    },
    error::{CrowdError, DeviceError, LifecycleError, Result},
};

pub const AMBIENT: f32 = 0.3;
pub const DIFFUSE: f32 = 0.8;

/// Floor vertex buffer: 6 vertices of position (3 × f32) and UV (2 × f32).
pub const FLOOR_VERTEX_BUFFER_SIZE: u64 = 6 * (3 + 2) * std::mem::size_of::<f32>() as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceLifecyclePhase {
    Uninitialized,
    Created,
    Reset,
    Lost,
    Destroyed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleOp {
    Create,
    Reset,
    Lose,
    Destroy,
}

/// Which phase range a resource is valid in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceClass {
    /// Valid from `Created` until `Destroyed`.
    CreatedPhase,
    /// Valid from `Reset` until `Lost`.
    DefaultPhase,
}

/// Asset locations the tracker loads device resources from.
#[derive(Clone, Debug)]
pub struct ResourceAssets {
    pub effect: PathBuf,
    pub floor_texture: PathBuf,
    pub font: FontDesc,
}

#[derive(Debug)]
pub struct CreatedPhaseResources {
    pub font: ResourceHandle,
    pub effect: ResourceHandle,
    pub mesh_layout: ResourceHandle,
    pub gpu_skinning_layout: ResourceHandle,
    pub floor_layout: ResourceHandle,
}

impl CreatedPhaseResources {
    fn handles(&self) -> [ResourceHandle; 5] {
        [
            self.font,
            self.effect,
            self.mesh_layout,
            self.gpu_skinning_layout,
            self.floor_layout,
        ]
    }

    pub fn layout(&self, kind: VertexLayoutKind) -> ResourceHandle {
        match kind {
            VertexLayoutKind::StaticMesh => self.mesh_layout,
            VertexLayoutKind::GpuSkinnedMesh => self.gpu_skinning_layout,
            VertexLayoutKind::Floor => self.floor_layout,
        }
    }
}

#[derive(Debug)]
pub struct DefaultPhaseResources {
    pub floor_buffer: ResourceHandle,
    pub sprite: ResourceHandle,
    pub floor_texture: ResourceHandle,
}

impl DefaultPhaseResources {
    fn handles(&self) -> [ResourceHandle; 3] {
        [self.floor_buffer, self.sprite, self.floor_texture]
    }
}

/// Borrowed view on every resource needed to draw a frame.
///
/// Only obtainable while the device is in the `Reset` phase, so a frame can
/// never read a handle whose phase is not active.
#[derive(Clone, Copy, Debug)]
pub struct FrameResources<'a> {
    pub created: &'a CreatedPhaseResources,
    pub default: &'a DefaultPhaseResources,
    pub back_buffer: BackBufferDesc,
}

/// Collects created handles so a failing step can roll back the ones that
/// already exist.
struct Staging<'d> {
    device: &'d mut dyn GraphicsDevice,
    created: Vec<ResourceHandle>,
}

impl<'d> Staging<'d> {
    fn new(device: &'d mut dyn GraphicsDevice) -> Self {
        Self {
            device,
            created: Vec::new(),
        }
    }

    fn create(
        &mut self,
        resource: &'static str,
        f: impl FnOnce(&mut dyn GraphicsDevice) -> Result<ResourceHandle, DeviceError>,
    ) -> Result<ResourceHandle> {
        let handle = f(&mut *self.device)
            .map_err(|source| CrowdError::ResourceCreation { resource, source })?;
        self.created.push(handle);
        Ok(handle)
    }

    fn rollback(self) {
        release_all(self.device, self.created);
    }

    fn commit(self) {}
}

/// Releases every handle, logging and swallowing individual failures.
fn release_all(device: &mut dyn GraphicsDevice, handles: impl IntoIterator<Item = ResourceHandle>) {
    for handle in handles {
        if let Err(e) = device.release(handle) {
            log::warn!("failed to release {} {}: {}", handle.kind().name(), handle.id(), e);
        }
    }
}

#[derive(Debug)]
pub struct ResourceLifecycleTracker {
    phase: DeviceLifecyclePhase,
    assets: ResourceAssets,
    created: Option<CreatedPhaseResources>,
    default: Option<DefaultPhaseResources>,
    back_buffer: Option<BackBufferDesc>,
}

impl ResourceLifecycleTracker {
    pub fn new(assets: ResourceAssets) -> Self {
        Self {
            phase: DeviceLifecyclePhase::Uninitialized,
            assets,
            created: None,
            default: None,
            back_buffer: None,
        }
    }

    pub fn phase(&self) -> DeviceLifecyclePhase {
        self.phase
    }

    pub fn back_buffer(&self) -> Option<BackBufferDesc> {
        self.back_buffer
    }

    pub fn created_resources(&self) -> Option<&CreatedPhaseResources> {
        self.created.as_ref()
    }

    pub fn default_resources(&self) -> Option<&DefaultPhaseResources> {
        self.default.as_ref()
    }

    /// Every handle currently held, tagged with its class.
    pub fn live_handles(&self) -> Vec<(ResourceClass, ResourceHandle)> {
        let created = self
            .created
            .iter()
            .flat_map(|c| c.handles())
            .map(|h| (ResourceClass::CreatedPhase, h));
        let default = self
            .default
            .iter()
            .flat_map(|d| d.handles())
            .map(|h| (ResourceClass::DefaultPhase, h));
        created.chain(default).collect()
    }

    /// The resources a frame may draw with.
    pub fn frame_resources(&self) -> Option<FrameResources<'_>> {
        if self.phase != DeviceLifecyclePhase::Reset {
            return None;
        }
        Some(FrameResources {
            created: self.created.as_ref()?,
            default: self.default.as_ref()?,
            back_buffer: self.back_buffer?,
        })
    }

    fn check(&self, operation: LifecycleOp, accepted: &[DeviceLifecyclePhase]) -> Result<()> {
        if accepted.contains(&self.phase) {
            Ok(())
        } else {
            let err = LifecycleError {
                operation,
                phase: self.phase,
            };
            log::error!("rejected device notification: {}", err);
            Err(err.into())
        }
    }

    /// Allocates the resources that live until the device is destroyed.
    ///
    /// Fails if the effect cannot be loaded; this is never retried.
    pub fn on_device_created(
        &mut self,
        device: &mut dyn GraphicsDevice,
        back_buffer: BackBufferDesc,
    ) -> Result<()> {
        self.check(LifecycleOp::Create, &[DeviceLifecyclePhase::Uninitialized])?;

        let mut staging = Staging::new(device);
        match Self::create_created_phase(&mut staging, &self.assets) {
            Ok(created) => {
                staging.commit();
                self.created = Some(created);
                self.back_buffer = Some(back_buffer);
                self.phase = DeviceLifecyclePhase::Created;
                log::info!(
                    "device created ({}x{})",
                    back_buffer.width,
                    back_buffer.height
                );
                Ok(())
            }
            Err(e) => {
                staging.rollback();
                Err(e)
            }
        }
    }

    fn create_created_phase(
        staging: &mut Staging<'_>,
        assets: &ResourceAssets,
    ) -> Result<CreatedPhaseResources> {
        let font = staging.create("diagnostics font", |d| d.create_font(&assets.font))?;
        let effect = staging
            .create("shader effect", |d| d.create_effect(&assets.effect))
            .map_err(|e| match e {
                CrowdError::ResourceCreation { source, .. } => CrowdError::EffectLoad {
                    path: assets.effect.clone(),
                    source,
                },
                e => e,
            })?;
        staging
            .device
            .set_effect_param(effect, params::AMBIENT, EffectValue::Float(AMBIENT))
            .and_then(|_| {
                staging
                    .device
                    .set_effect_param(effect, params::DIFFUSE, EffectValue::Float(DIFFUSE))
            })
            .map_err(|source| CrowdError::EffectLoad {
                path: assets.effect.clone(),
                source,
            })?;
        let mesh_layout = staging.create("mesh vertex layout", |d| {
            d.create_vertex_layout(VertexLayoutKind::StaticMesh)
        })?;
        let gpu_skinning_layout = staging.create("gpu skinning vertex layout", |d| {
            d.create_vertex_layout(VertexLayoutKind::GpuSkinnedMesh)
        })?;
        let floor_layout = staging.create("floor vertex layout", |d| {
            d.create_vertex_layout(VertexLayoutKind::Floor)
        })?;
        Ok(CreatedPhaseResources {
            font,
            effect,
            mesh_layout,
            gpu_skinning_layout,
            floor_layout,
        })
    }

    /// Allocates the resources that are lost together with the device.
    ///
    /// Calling this twice without an intervening [`Self::on_device_lost`]
    /// releases the first set before allocating the second.
    pub fn on_device_reset(
        &mut self,
        device: &mut dyn GraphicsDevice,
        back_buffer: BackBufferDesc,
    ) -> Result<()> {
        self.check(
            LifecycleOp::Reset,
            &[
                DeviceLifecyclePhase::Created,
                DeviceLifecyclePhase::Lost,
                DeviceLifecyclePhase::Reset,
            ],
        )?;
        let fallback = match self.phase {
            DeviceLifecyclePhase::Created => DeviceLifecyclePhase::Created,
            _ => DeviceLifecyclePhase::Lost,
        };
        if let Some(stale) = self.default.take() {
            log::warn!("device reset twice without being lost, releasing previous resources");
            release_all(device, stale.handles());
        }

        if let Some(created) = &self.created {
            for handle in [created.font, created.effect] {
                if let Err(source) = device.restore(handle) {
                    self.phase = fallback;
                    return Err(CrowdError::ResourceCreation {
                        resource: handle.kind().name(),
                        source,
                    });
                }
            }
        }

        let mut staging = Staging::new(device);
        let default = (|| -> Result<DefaultPhaseResources> {
            let floor_buffer = staging.create("floor vertex buffer", |d| {
                d.create_vertex_buffer(FLOOR_VERTEX_BUFFER_SIZE)
            })?;
            let sprite = staging.create("text sprite", |d| d.create_sprite())?;
            let floor_texture = staging.create("floor texture", |d| {
                d.create_texture(&self.assets.floor_texture)
            })?;
            Ok(DefaultPhaseResources {
                floor_buffer,
                sprite,
                floor_texture,
            })
        })();

        match default {
            Ok(default) => {
                staging.commit();
                self.default = Some(default);
                self.back_buffer = Some(back_buffer);
                self.phase = DeviceLifecyclePhase::Reset;
                log::info!("device reset ({}x{})", back_buffer.width, back_buffer.height);
                Ok(())
            }
            Err(e) => {
                staging.rollback();
                self.phase = fallback;
                Err(e)
            }
        }
    }

    /// Releases the reset-phase resources. Individual release failures are
    /// logged and ignored.
    pub fn on_device_lost(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        self.check(LifecycleOp::Lose, &[DeviceLifecyclePhase::Reset])?;
        if let Some(created) = &self.created {
            device.invalidate(created.font);
            device.invalidate(created.effect);
        }
        if let Some(default) = self.default.take() {
            release_all(device, default.handles());
        }
        self.phase = DeviceLifecyclePhase::Lost;
        log::info!("device lost");
        Ok(())
    }

    /// Releases everything still held. Always runs to completion.
    pub fn on_device_destroyed(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        self.check(
            LifecycleOp::Destroy,
            &[
                DeviceLifecyclePhase::Created,
                DeviceLifecyclePhase::Reset,
                DeviceLifecyclePhase::Lost,
            ],
        )?;
        if let Some(default) = self.default.take() {
            release_all(device, default.handles());
        }
        if let Some(created) = self.created.take() {
            release_all(device, created.handles());
        }
        self.back_buffer = None;
        self.phase = DeviceLifecyclePhase::Destroyed;
        log::info!("device destroyed");
        Ok(())
    }
}
