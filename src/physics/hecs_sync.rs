use crate::{
    math as m,
    physics::{BodyKey, PhysicsWorld, Velocity},
};

use thunderdome as td;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HecsSyncOptions {
    pub hecs_to_physics: bool,
    pub physics_to_hecs: bool,
    pub autodelete: bool,
}

impl HecsSyncOptions {
    #[inline]
    pub fn both_ways() -> Self {
        Self {
            hecs_to_physics: true,
            physics_to_hecs: true,
            autodelete: true,
        }
    }

    #[inline]
    pub fn hecs_to_physics_only() -> Self {
        Self {
            hecs_to_physics: true,
            physics_to_hecs: false,
            autodelete: true,
        }
    }

    #[inline]
    pub fn physics_to_hecs_only() -> Self {
        Self {
            hecs_to_physics: false,
            physics_to_hecs: true,
            autodelete: false,
        }
    }

    #[inline]
    pub fn do_not_sync() -> Self {
        Self {
            hecs_to_physics: false,
            physics_to_hecs: false,
            autodelete: false,
        }
    }
}

/// Automatically syncs information between a [`hecs`][hecs] world
/// and a [`PhysicsWorld`][super::PhysicsWorld].
///
/// Entities are linked to bodies through a [`BodyKey`] component.
/// The body's origin [`Pose`][m::Pose] and its [`Velocity`] are synced
/// with components of the same types on the entity, if it has them.
#[derive(Default, Debug)]
pub struct HecsSyncManager {
    /// If set, automatically uses these options to register all hecs entities
    /// with [`BodyKey`][BodyKey] components that haven't been registered manually.
    /// None by default.
    pub default_opts: Option<HecsSyncOptions>,
    body_entity_map: td::Arena<(hecs::Entity, HecsSyncOptions)>,
}

impl HecsSyncManager {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn new_autosync(opts: HecsSyncOptions) -> Self {
        Self {
            default_opts: Some(opts),
            ..Self::default()
        }
    }

    #[inline]
    pub fn register_body(&mut self, body: BodyKey, entity: hecs::Entity, opts: HecsSyncOptions) {
        self.body_entity_map.insert_at(body.0, (entity, opts));
    }

    /// Stop syncing a body. Returns the entity it was linked to, if any.
    #[inline]
    pub fn unregister_body(&mut self, body: BodyKey) -> Option<hecs::Entity> {
        self.body_entity_map.remove(body.0).map(|(entity, _)| entity)
    }

    /// The entity a body is linked to, if it's registered.
    #[inline]
    pub fn body_entity(&self, body: BodyKey) -> Option<hecs::Entity> {
        self.body_entity_map.get(body.0).map(|(entity, _)| *entity)
    }

    /// Sync data from a hecs world to the physics world.
    /// Call before [`PhysicsWorld::step`][PhysicsWorld::step].
    ///
    /// Bodies are only teleported if their pose component was changed,
    /// so that resting bodies aren't woken up every frame.
    pub fn sync_hecs_to_physics(
        &mut self,
        physics: &mut PhysicsWorld,
        hecs_world: &mut hecs::World,
    ) {
        // auto-register new entities
        if let Some(opts) = self.default_opts {
            for (entity, body_key) in hecs_world.query_mut::<&BodyKey>() {
                if !self.body_entity_map.contains(body_key.0) {
                    self.body_entity_map.insert_at(body_key.0, (entity, opts));
                }
            }
        }
        self.body_entity_map.retain(|body_key, (entity, opts)| {
            let body_key = BodyKey(body_key);
            // auto-delete bodies for entities that don't exist anymore,
            // using the surrounding `retain` to also delete them from this map
            if opts.autodelete && !hecs_world.contains(*entity) {
                if let Err(err) = physics.destroy_body(body_key) {
                    log::debug!("body of despawned entity {entity:?} was already gone: {err}");
                }
                return false;
            }
            if !opts.hecs_to_physics {
                return true;
            }
            let Some(body) = physics.get_body(body_key) else {
                return true;
            };
            let (current_pose, current_angle, current_vel) =
                (body.pose(), body.angle(), body.velocity());

            if let Ok(pose) = hecs_world.query_one_mut::<&m::Pose>(*entity) {
                if *pose != current_pose {
                    // keep the accumulated angle instead of wrapping it to [-pi, pi]
                    let delta = (current_pose.rotation.reversed() * pose.rotation).angle();
                    if let Err(err) =
                        physics.set_transform(body_key, pose.translation, current_angle + delta)
                    {
                        log::warn!("could not sync pose of entity {entity:?}: {err}");
                    }
                }
            }
            if let Ok(vel) = hecs_world.query_one_mut::<&Velocity>(*entity) {
                if *vel != current_vel {
                    if let Some(body) = physics.get_body_mut(body_key) {
                        body.set_velocity(*vel);
                    }
                }
            }
            true
        });
    }

    /// Sync data from a physics world to a hecs world.
    /// Call after [`PhysicsWorld::step`][PhysicsWorld::step].
    pub fn sync_physics_to_hecs(&mut self, physics: &PhysicsWorld, hecs_world: &mut hecs::World) {
        for (body_key, (entity, opts)) in self.body_entity_map.iter() {
            if !opts.physics_to_hecs {
                continue;
            }
            let Some(body) = physics.get_body(BodyKey(body_key)) else {
                continue;
            };
            if let Ok(pose) = hecs_world.query_one_mut::<&mut m::Pose>(*entity) {
                *pose = body.pose();
            }
            if let Ok(vel) = hecs_world.query_one_mut::<&mut Velocity>(*entity) {
                *vel = body.velocity();
            }
        }
    }
}
