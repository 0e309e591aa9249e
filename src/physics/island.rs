use super::{BodyKey, BodyType, ContactKey, ContactManager, EntitySet, JointKey, JointSet};

/// A group of bodies connected by touching contacts and joints,
/// solved together and put to sleep together.
///
/// Reused between islands and steps to keep its allocations.
#[derive(Debug, Default)]
pub(super) struct Island {
    pub bodies: Vec<BodyKey>,
    pub contacts: Vec<ContactKey>,
    pub joints: Vec<JointKey>,
    stack: Vec<BodyKey>,
}

impl Island {
    /// Gather the island reachable from `seed` with a depth-first search.
    ///
    /// Returns false without touching anything if the seed is already in an island,
    /// asleep or static. Every body reached is woken up and given an index
    /// into the solver's buffers. Static bodies end the search but are included,
    /// and it's up to the caller to clear their flags so other islands can use them.
    pub fn build(
        &mut self,
        seed: BodyKey,
        entities: &mut EntitySet,
        contacts: &mut ContactManager,
        joints: &mut JointSet,
    ) -> bool {
        self.bodies.clear();
        self.contacts.clear();
        self.joints.clear();
        self.stack.clear();

        let Some(seed_body) = entities.bodies.get_mut(seed.0) else {
            return false;
        };
        if seed_body.island_flag || !seed_body.awake || seed_body.body_type == BodyType::Static {
            return false;
        }
        seed_body.island_flag = true;
        self.stack.push(seed);

        while let Some(key) = self.stack.pop() {
            let Some(body) = entities.bodies.get_mut(key.0) else {
                continue;
            };
            body.island_index = self.bodies.len();
            body.awake = true;
            self.bodies.push(key);
            if body.body_type == BodyType::Static {
                continue;
            }

            let Some(body) = entities.bodies.get(key.0) else {
                continue;
            };
            let unflagged = |other: BodyKey| {
                entities
                    .bodies
                    .get(other.0)
                    .is_some_and(|b| !b.island_flag)
            };
            let first_new = self.stack.len();

            for &contact_key in &body.contacts {
                let Some(contact) = contacts.contacts.get_mut(contact_key.0) else {
                    continue;
                };
                if contact.island_flag || !contact.enabled || !contact.touching || contact.sensor {
                    continue;
                }
                contact.island_flag = true;
                self.contacts.push(contact_key);
                let other = contact.other_body(key);
                if unflagged(other) {
                    self.stack.push(other);
                }
            }

            for &joint_key in &body.joints {
                let Some(joint) = joints.joints.get_mut(joint_key.0) else {
                    continue;
                };
                if joint.island_flag {
                    continue;
                }
                joint.island_flag = true;
                self.joints.push(joint_key);
                let other = joint.other_body(key);
                if unflagged(other) {
                    self.stack.push(other);
                }
            }

            // flag what was just pushed, dropping bodies reached twice
            let mut write = first_new;
            for read in first_new..self.stack.len() {
                let other = self.stack[read];
                let Some(other_body) = entities.bodies.get_mut(other.0) else {
                    continue;
                };
                if other_body.island_flag {
                    continue;
                }
                other_body.island_flag = true;
                self.stack[write] = other;
                write += 1;
            }
            self.stack.truncate(write);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::Vec2,
        physics::{collision::Shape, BodyDef, FixtureDef, JointDef, PhysicsWorld, WorldParams},
    };

    fn ball(world: &mut PhysicsWorld, x: f64, y: f64) -> BodyKey {
        let body = world
            .create_body(&BodyDef::new_dynamic().with_position(Vec2::new(x, y)))
            .unwrap();
        world
            .create_fixture(
                body,
                &FixtureDef::new(Shape::circle(0.5).unwrap()).with_density(1.0),
            )
            .unwrap();
        body
    }

    fn build_all(world: &mut PhysicsWorld) -> Vec<Vec<BodyKey>> {
        let mut island = Island::default();
        let mut islands = Vec::new();
        for (_, b) in world.entity_set.bodies.iter_mut() {
            b.island_flag = false;
        }
        let keys: Vec<BodyKey> = world.entity_set.bodies().map(|(k, _)| k).collect();
        for key in keys {
            if island.build(
                key,
                &mut world.entity_set,
                &mut world.contacts,
                &mut world.joint_set,
            ) {
                for &k in &island.bodies {
                    let body = world.entity_set.get_body_mut(k).unwrap();
                    if body.body_type == BodyType::Static {
                        body.island_flag = false;
                    }
                }
                islands.push(island.bodies.clone());
            }
        }
        islands
    }

    #[test]
    fn joints_connect_islands() {
        let mut world = PhysicsWorld::new(WorldParams::default()).unwrap();
        let a = ball(&mut world, 0.0, 0.0);
        let b = ball(&mut world, 5.0, 0.0);
        let c = ball(&mut world, 10.0, 0.0);
        world.create_joint(&JointDef::distance(a, b, 5.0)).unwrap();

        let islands = build_all(&mut world);
        assert_eq!(islands.len(), 2);
        let joined = islands.iter().find(|i| i.len() == 2).unwrap();
        assert!(joined.contains(&a) && joined.contains(&b));
        assert!(islands.iter().any(|i| i == &vec![c]));

        // indices are positions in the island's body list
        for island in &islands {
            for (i, key) in island.iter().enumerate() {
                assert_eq!(world.get_body(*key).unwrap().island_index, i);
            }
        }
    }

    #[test]
    fn static_bodies_do_not_merge_islands() {
        let mut world = PhysicsWorld::new(WorldParams::default()).unwrap();
        let ground = world.create_body(&BodyDef::new_static()).unwrap();
        let a = ball(&mut world, -3.0, 1.0);
        let b = ball(&mut world, 3.0, 1.0);
        world.create_joint(&JointDef::revolute(ground, a)).unwrap();
        world.create_joint(&JointDef::revolute(ground, b)).unwrap();

        let islands = build_all(&mut world);
        assert_eq!(islands.len(), 2);
        for island in &islands {
            assert_eq!(island.len(), 2);
            assert!(island.contains(&ground));
        }
    }

    #[test]
    fn sleeping_and_static_seeds_are_skipped() {
        let mut world = PhysicsWorld::new(WorldParams::default()).unwrap();
        let ground = world.create_body(&BodyDef::new_static()).unwrap();
        let a = ball(&mut world, 0.0, 0.0);
        world.get_body_mut(a).unwrap().set_awake(false);

        let mut island = Island::default();
        assert!(!island.build(
            ground,
            &mut world.entity_set,
            &mut world.contacts,
            &mut world.joint_set
        ));
        assert!(!island.build(
            a,
            &mut world.entity_set,
            &mut world.contacts,
            &mut world.joint_set
        ));
    }
}
