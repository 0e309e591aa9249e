//! Persistent contacts between pairs of fixtures.

use super::{
    collision::{collide, BroadPhase, Manifold, ShapeType, WorldManifold},
    BodyKey, BodyType, CommandQueue, ContactListener, EntitySet, FixtureKey, JointSet,
    MAX_MANIFOLD_POINTS,
};

use std::collections::HashMap;
use thunderdome as td;

/// Key type to look up a contact stored in the physics world.
///
/// Contacts come and go as fixtures start and stop overlapping,
/// so keys shouldn't be held on to for long.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContactKey(pub(super) td::Index);

/// A potential or actual contact between two fixtures whose broad phase AABBs overlap.
///
/// A contact is touching if its manifold has at least one point.
#[derive(Clone, Debug)]
pub struct Contact {
    pub(crate) fixture_a: FixtureKey,
    pub(crate) fixture_b: FixtureKey,
    pub(crate) body_a: BodyKey,
    pub(crate) body_b: BodyKey,
    pub(crate) manifold: Manifold,
    pub(crate) friction: f64,
    pub(crate) restitution: f64,
    base_friction: f64,
    base_restitution: f64,
    pub(crate) touching: bool,
    pub(crate) enabled: bool,
    pub(crate) sensor: bool,
    /// Set when the filtering of either fixture changed and the pair needs to be rechecked.
    pub(crate) filter_dirty: bool,
    pub(crate) island_flag: bool,
}

/// Friction of a contact given the frictions of its fixtures.
#[inline]
pub fn mix_friction(friction_a: f64, friction_b: f64) -> f64 {
    (friction_a * friction_b).sqrt()
}

/// Restitution of a contact given the restitutions of its fixtures.
#[inline]
pub fn mix_restitution(restitution_a: f64, restitution_b: f64) -> f64 {
    restitution_a.max(restitution_b)
}

impl Contact {
    pub(crate) fn new(
        fixture_a: FixtureKey,
        body_a: BodyKey,
        fixture_b: FixtureKey,
        body_b: BodyKey,
        friction: f64,
        restitution: f64,
        sensor: bool,
    ) -> Self {
        Self {
            fixture_a,
            fixture_b,
            body_a,
            body_b,
            manifold: Manifold::empty(),
            friction,
            restitution,
            base_friction: friction,
            base_restitution: restitution,
            touching: false,
            enabled: true,
            sensor,
            filter_dirty: false,
            island_flag: false,
        }
    }

    #[inline]
    pub fn fixture_a(&self) -> FixtureKey {
        self.fixture_a
    }

    #[inline]
    pub fn fixture_b(&self) -> FixtureKey {
        self.fixture_b
    }

    #[inline]
    pub fn body_a(&self) -> BodyKey {
        self.body_a
    }

    #[inline]
    pub fn body_b(&self) -> BodyKey {
        self.body_b
    }

    /// The contact points in local coordinates.
    #[inline]
    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    /// Compute the contact normal, points and separations in world space.
    /// `None` if either fixture no longer exists.
    pub fn world_manifold(&self, entities: &EntitySet) -> Option<WorldManifold> {
        let fixture_a = entities.get_fixture(self.fixture_a)?;
        let fixture_b = entities.get_fixture(self.fixture_b)?;
        let body_a = entities.get_body(self.body_a)?;
        let body_b = entities.get_body(self.body_b)?;
        Some(WorldManifold::new(
            &self.manifold,
            &body_a.pose,
            fixture_a.shape.collision_radius(),
            &body_b.pose,
            fixture_b.shape.collision_radius(),
        ))
    }

    #[inline]
    pub fn is_touching(&self) -> bool {
        self.touching
    }

    #[inline]
    pub fn is_sensor(&self) -> bool {
        self.sensor
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disable the contact for the current step.
    /// Call from [`ContactListener::pre_solve`], it's re-enabled every step.
    #[inline]
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn friction(&self) -> f64 {
        self.friction
    }

    /// Override the mixed friction. Persists until [`reset_friction`][Self::reset_friction].
    #[inline]
    pub fn set_friction(&mut self, friction: f64) {
        self.friction = friction;
    }

    #[inline]
    pub fn reset_friction(&mut self) {
        self.friction = self.base_friction;
    }

    #[inline]
    pub fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Override the mixed restitution. Persists until [`reset_restitution`][Self::reset_restitution].
    #[inline]
    pub fn set_restitution(&mut self, restitution: f64) {
        self.restitution = restitution;
    }

    #[inline]
    pub fn reset_restitution(&mut self) {
        self.restitution = self.base_restitution;
    }

    /// The body on the other side of the contact from the given one.
    #[inline]
    pub fn other_body(&self, body: BodyKey) -> BodyKey {
        if body == self.body_a {
            self.body_b
        } else {
            self.body_a
        }
    }

    /// Replace the manifold with a freshly computed one,
    /// carrying accumulated impulses over to points with matching feature ids.
    /// Returns the old manifold.
    pub(crate) fn update(&mut self, mut manifold: Manifold, sensor: bool) -> Manifold {
        let old_manifold = self.manifold;
        self.enabled = true;
        self.sensor = sensor;

        if sensor {
            // sensors only care about overlap, they never reach the solver
            self.touching = !manifold.is_empty();
            manifold.clear();
        } else {
            for point in manifold.points_mut() {
                point.normal_impulse = 0.0;
                point.tangent_impulse = 0.0;
                let key = point.id.key();
                if let Some(old) = old_manifold.points().iter().find(|p| p.id.key() == key) {
                    point.normal_impulse = old.normal_impulse;
                    point.tangent_impulse = old.tangent_impulse;
                }
            }
            self.touching = !manifold.is_empty();
        }
        self.manifold = manifold;
        old_manifold
    }
}

/// Impulses applied at each point of a contact during a step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContactImpulse {
    normal_impulses: [f64; MAX_MANIFOLD_POINTS],
    tangent_impulses: [f64; MAX_MANIFOLD_POINTS],
    count: usize,
}

impl ContactImpulse {
    pub(crate) fn from_manifold(manifold: &Manifold) -> Self {
        let mut out = Self {
            count: manifold.point_count(),
            ..Self::default()
        };
        for (i, p) in manifold.points().iter().enumerate() {
            out.normal_impulses[i] = p.normal_impulse;
            out.tangent_impulses[i] = p.tangent_impulse;
        }
        out
    }

    #[inline]
    pub fn normal_impulses(&self) -> &[f64] {
        &self.normal_impulses[..self.count]
    }

    #[inline]
    pub fn tangent_impulses(&self) -> &[f64] {
        &self.tangent_impulses[..self.count]
    }

    /// Sum of the normal impulses over all points.
    #[inline]
    pub fn total_normal_impulse(&self) -> f64 {
        self.normal_impulses().iter().sum()
    }
}

/// Contact events waiting to be delivered to the listener.
/// Each carries a snapshot of the contact at the time of the event.
#[derive(Clone, Debug)]
pub(crate) enum ContactEvent {
    Begin(Contact),
    End(Contact),
    SensorBegin(Contact),
    SensorEnd(Contact),
    PostSolve(Contact, ContactImpulse),
}

//
// Manager
//

/// Creates, updates and destroys contacts based on broad phase pairs.
#[derive(Clone, Debug, Default)]
pub struct ContactManager {
    pub(super) contacts: td::Arena<Contact>,
    pair_map: HashMap<(u64, u64), ContactKey>,
}

fn pair_key(a: FixtureKey, b: FixtureKey) -> (u64, u64) {
    let (a, b) = (a.0.to_bits(), b.0.to_bits());
    (a.min(b), a.max(b))
}

/// Check everything that can rule out a contact between two fixtures.
fn should_collide(
    fixture_a: FixtureKey,
    fixture_b: FixtureKey,
    entities: &EntitySet,
    joints: &JointSet,
) -> bool {
    let (Some(fa), Some(fb)) = (entities.get_fixture(fixture_a), entities.get_fixture(fixture_b))
    else {
        return false;
    };
    if fa.body == fb.body {
        return false;
    }
    let (Some(body_a), Some(body_b)) = (entities.get_body(fa.body), entities.get_body(fb.body))
    else {
        return false;
    };
    if body_a.body_type != BodyType::Dynamic && body_b.body_type != BodyType::Dynamic {
        return false;
    }
    let connected_by_joint = body_a.joints.iter().any(|&jk| {
        joints
            .get(jk)
            .map_or(false, |j| !j.collide_connected && j.other_body(fa.body) == fb.body)
    });
    if connected_by_joint {
        return false;
    }
    if !fa.filter.should_collide(&fb.filter) {
        return false;
    }
    !(fa.shape.shape_type() == ShapeType::Edge && fb.shape.shape_type() == ShapeType::Edge)
}

impl ContactManager {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, key: ContactKey) -> Option<&Contact> {
        self.contacts.get(key.0)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (ContactKey, &Contact)> + '_ {
        self.contacts.iter().map(|(k, c)| (ContactKey(k), c))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Find the contact between two fixtures, if one exists.
    #[inline]
    pub fn find(&self, a: FixtureKey, b: FixtureKey) -> Option<ContactKey> {
        self.pair_map.get(&pair_key(a, b)).copied()
    }

    pub(crate) fn clear(&mut self) {
        self.contacts.clear();
        self.pair_map.clear();
    }

    /// Create a contact for a new broad phase pair unless it exists already
    /// or filtering rules it out.
    pub(crate) fn add_pair(
        &mut self,
        fixture_a: FixtureKey,
        fixture_b: FixtureKey,
        entities: &mut EntitySet,
        joints: &JointSet,
    ) {
        let pair = pair_key(fixture_a, fixture_b);
        if fixture_a == fixture_b || self.pair_map.contains_key(&pair) {
            return;
        }
        if !should_collide(fixture_a, fixture_b, entities, joints) {
            return;
        }
        let (Some(fa), Some(fb)) = (entities.get_fixture(fixture_a), entities.get_fixture(fixture_b))
        else {
            return;
        };
        let (body_a, body_b) = (fa.body, fb.body);
        let contact = Contact::new(
            fixture_a,
            body_a,
            fixture_b,
            body_b,
            mix_friction(fa.friction, fb.friction),
            mix_restitution(fa.restitution, fb.restitution),
            fa.is_sensor || fb.is_sensor,
        );

        let key = ContactKey(self.contacts.insert(contact));
        self.pair_map.insert(pair, key);
        for body_key in [body_a, body_b] {
            if let Some(body) = entities.get_body_mut(body_key) {
                body.contacts.push(key);
            }
        }
    }

    /// Remove a contact, buffering an end event if it was touching.
    pub(crate) fn destroy(
        &mut self,
        key: ContactKey,
        entities: &mut EntitySet,
        events: &mut Vec<ContactEvent>,
    ) {
        let Some(contact) = self.contacts.remove(key.0) else {
            return;
        };
        self.pair_map
            .remove(&pair_key(contact.fixture_a, contact.fixture_b));
        for body_key in [contact.body_a, contact.body_b] {
            if let Some(body) = entities.get_body_mut(body_key) {
                body.contacts.retain(|&c| c != key);
                // whatever was resting on this contact needs to react
                if contact.touching && !contact.sensor {
                    body.set_awake(true);
                }
            }
        }
        if contact.touching {
            events.push(if contact.sensor {
                ContactEvent::SensorEnd(contact)
            } else {
                ContactEvent::End(contact)
            });
        }
    }

    pub(crate) fn destroy_body_contacts(
        &mut self,
        body: BodyKey,
        entities: &mut EntitySet,
        events: &mut Vec<ContactEvent>,
    ) {
        let Some(keys) = entities.get_body(body).map(|b| b.contacts.clone()) else {
            return;
        };
        for key in keys {
            self.destroy(key, entities, events);
        }
    }

    pub(crate) fn destroy_fixture_contacts(
        &mut self,
        fixture: FixtureKey,
        entities: &mut EntitySet,
        events: &mut Vec<ContactEvent>,
    ) {
        let keys = self.fixture_contacts(fixture, entities);
        for key in keys {
            self.destroy(key, entities, events);
        }
    }

    fn fixture_contacts(&self, fixture: FixtureKey, entities: &EntitySet) -> Vec<ContactKey> {
        let Some(body) = entities.get_fixture_body(fixture) else {
            return Vec::new();
        };
        body.contacts
            .iter()
            .copied()
            .filter(|k| {
                self.contacts
                    .get(k.0)
                    .map_or(false, |c| c.fixture_a == fixture || c.fixture_b == fixture)
            })
            .collect()
    }

    /// Mark a fixture's contacts to be rechecked against the filtering rules on the next step.
    pub(crate) fn flag_fixture_for_filtering(&mut self, fixture: FixtureKey, entities: &EntitySet) {
        for key in self.fixture_contacts(fixture, entities) {
            if let Some(contact) = self.contacts.get_mut(key.0) {
                contact.filter_dirty = true;
            }
        }
    }

    /// Mark every contact between two bodies to be rechecked against the filtering rules.
    pub(crate) fn flag_pair_for_filtering(&mut self, a: BodyKey, b: BodyKey, entities: &EntitySet) {
        let Some(body) = entities.get_body(a) else {
            return;
        };
        for key in &body.contacts {
            if let Some(contact) = self.contacts.get_mut(key.0) {
                if contact.other_body(a) == b {
                    contact.filter_dirty = true;
                }
            }
        }
    }

    /// Update every contact involving an awake body:
    /// destroy the ones that stopped overlapping in the broad phase
    /// and recompute manifolds for the rest.
    pub(crate) fn collide(
        &mut self,
        entities: &mut EntitySet,
        joints: &JointSet,
        broad_phase: &BroadPhase<FixtureKey>,
        mut listener: Option<&mut (dyn ContactListener + 'static)>,
        commands: &mut CommandQueue,
        events: &mut Vec<ContactEvent>,
    ) {
        let keys: Vec<ContactKey> = self.contacts.iter().map(|(k, _)| ContactKey(k)).collect();
        let mut to_update: Vec<ContactKey> = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(contact) = self.contacts.get_mut(key.0) else {
                continue;
            };
            let (fixture_a, fixture_b, body_a, body_b) =
                (contact.fixture_a, contact.fixture_b, contact.body_a, contact.body_b);

            if contact.filter_dirty {
                if !should_collide(fixture_a, fixture_b, entities, joints) {
                    self.destroy(key, entities, events);
                    continue;
                }
                contact.filter_dirty = false;
            }

            let is_active = |body: BodyKey| {
                entities
                    .get_body(body)
                    .map_or(false, |b| b.awake && b.body_type != BodyType::Static)
            };
            if !is_active(body_a) && !is_active(body_b) {
                continue;
            }

            let proxy_a = entities.get_fixture(fixture_a).and_then(|f| f.proxy);
            let proxy_b = entities.get_fixture(fixture_b).and_then(|f| f.proxy);
            let overlap = match (proxy_a, proxy_b) {
                (Some(a), Some(b)) => broad_phase.test_overlap(a, b),
                _ => false,
            };
            if !overlap {
                self.destroy(key, entities, events);
                continue;
            }
            to_update.push(key);
        }

        let manifolds = self.evaluate(&to_update, entities);
        log::trace!("updating {} of {} contacts", manifolds.len(), self.contacts.len());
        for (key, manifold, sensor) in manifolds {
            self.update_contact(
                key,
                manifold,
                sensor,
                entities,
                listener.as_deref_mut(),
                commands,
                events,
            );
        }
    }

    /// Run the narrow phase for the given contacts.
    fn evaluate(
        &self,
        keys: &[ContactKey],
        entities: &EntitySet,
    ) -> Vec<(ContactKey, Manifold, bool)> {
        let evaluate_one = |key: &ContactKey| -> Option<(ContactKey, Manifold, bool)> {
            let contact = self.contacts.get(key.0)?;
            let fixture_a = entities.get_fixture(contact.fixture_a)?;
            let fixture_b = entities.get_fixture(contact.fixture_b)?;
            let pose_a = entities.get_body(contact.body_a)?.pose;
            let pose_b = entities.get_body(contact.body_b)?.pose;
            let manifold = collide(&fixture_a.shape, &pose_a, &fixture_b.shape, &pose_b);
            Some((*key, manifold, fixture_a.is_sensor || fixture_b.is_sensor))
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            keys.par_iter().filter_map(evaluate_one).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            keys.iter().filter_map(evaluate_one).collect()
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn update_contact(
        &mut self,
        key: ContactKey,
        manifold: Manifold,
        sensor: bool,
        entities: &mut EntitySet,
        listener: Option<&mut (dyn ContactListener + 'static)>,
        commands: &mut CommandQueue,
        events: &mut Vec<ContactEvent>,
    ) {
        let Some(contact) = self.contacts.get_mut(key.0) else {
            return;
        };
        let was_touching = contact.touching;
        let old_manifold = contact.update(manifold, sensor);
        let touching = contact.touching;

        if !sensor && touching != was_touching {
            let (a, b) = entities.get_body_pair_mut(contact.body_a, contact.body_b);
            for body in [a, b].into_iter().flatten() {
                body.set_awake(true);
            }
        }

        match (was_touching, touching, sensor) {
            (false, true, false) => events.push(ContactEvent::Begin(contact.clone())),
            (false, true, true) => events.push(ContactEvent::SensorBegin(contact.clone())),
            (true, false, false) => events.push(ContactEvent::End(contact.clone())),
            (true, false, true) => events.push(ContactEvent::SensorEnd(contact.clone())),
            _ => {}
        }

        if touching && !sensor {
            if let Some(listener) = listener {
                listener.pre_solve(contact, &old_manifold, entities, commands);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;
    use crate::physics::{
        collision::{ContactFeatureType, ContactId, ManifoldKind, ManifoldPoint, Shape},
        Body, BodyDef, Filter, Fixture, FixtureDef,
    };

    fn point(index_a: u8, normal_impulse: f64) -> ManifoldPoint {
        ManifoldPoint {
            local_point: Vec2::zero(),
            normal_impulse,
            tangent_impulse: normal_impulse * 0.1,
            id: ContactId {
                index_a,
                index_b: 0,
                type_a: ContactFeatureType::Vertex,
                type_b: ContactFeatureType::Face,
            },
        }
    }

    fn add_body_with_fixture(
        entities: &mut EntitySet,
        def: BodyDef,
        fixture: FixtureDef,
    ) -> (BodyKey, FixtureKey) {
        let body = entities.insert_body(Body::new(&def));
        let fixture = entities.insert_fixture(Fixture::new(body, &fixture));
        if let Some(b) = entities.get_body_mut(body) {
            b.fixtures.push(fixture);
        }
        (body, fixture)
    }

    fn dummy_contact() -> Contact {
        let mut entities = EntitySet::new();
        let (b, f) = add_body_with_fixture(
            &mut entities,
            BodyDef::new_dynamic(),
            FixtureDef::new(Shape::circle(1.0).unwrap()),
        );
        Contact::new(f, b, f, b, 0.2, 0.0, false)
    }

    #[test]
    fn update_carries_impulses_by_feature_id() {
        let mut contact = dummy_contact();
        let mut first = Manifold::new(ManifoldKind::FaceA, Vec2::unit_y(), Vec2::zero());
        first.push(point(0, 0.0));
        first.push(point(1, 0.0));
        contact.update(first, false);
        assert!(contact.is_touching());
        for (i, p) in contact.manifold.points_mut().iter_mut().enumerate() {
            p.normal_impulse = 1.0 + i as f64;
            p.tangent_impulse = 0.5;
        }

        // new manifold with one matching and one new feature, impulses given are ignored
        let mut second = Manifold::new(ManifoldKind::FaceA, Vec2::unit_y(), Vec2::zero());
        second.push(point(1, 10.0));
        second.push(point(2, 10.0));
        let old = contact.update(second, false);

        assert_eq!(old.point_count(), 2);
        let points = contact.manifold().points();
        assert_eq!(points[0].normal_impulse, 2.0);
        assert_eq!(points[0].tangent_impulse, 0.5);
        assert_eq!(points[1].normal_impulse, 0.0);
        assert_eq!(points[1].tangent_impulse, 0.0);

        contact.update(Manifold::empty(), false);
        assert!(!contact.is_touching());
    }

    #[test]
    fn sensors_track_overlap_without_points() {
        let mut contact = dummy_contact();
        let mut m = Manifold::new(ManifoldKind::Circles, Vec2::zero(), Vec2::zero());
        m.push(point(0, 0.0));
        contact.set_enabled(false);
        contact.update(m, true);
        assert!(contact.is_touching());
        assert!(contact.is_sensor());
        assert!(contact.is_enabled());
        assert!(contact.manifold().is_empty());
    }

    #[test]
    fn mixing_rules() {
        assert!((mix_friction(0.25, 1.0) - 0.5).abs() < 1e-12);
        assert_eq!(mix_friction(0.0, 1.0), 0.0);
        assert_eq!(mix_restitution(0.2, 0.7), 0.7);

        let mut contact = dummy_contact();
        contact.set_friction(0.9);
        contact.set_restitution(1.0);
        contact.reset_friction();
        contact.reset_restitution();
        assert_eq!(contact.friction(), 0.2);
        assert_eq!(contact.restitution(), 0.0);
    }

    #[test]
    fn pairs_are_filtered() {
        let mut entities = EntitySet::new();
        let joints = JointSet::new();
        let mut manager = ContactManager::new();
        let circle = FixtureDef::new(Shape::circle(1.0).unwrap());
        let edge = FixtureDef::new(Shape::edge(Vec2::zero(), Vec2::unit_x()).unwrap());

        let (ground, ground_edge) =
            add_body_with_fixture(&mut entities, BodyDef::new_static(), edge.clone());
        let (_, other_edge) =
            add_body_with_fixture(&mut entities, BodyDef::new_dynamic(), edge.clone());
        let (_, ball) = add_body_with_fixture(&mut entities, BodyDef::new_dynamic(), circle.clone());
        let (_, static_ball) =
            add_body_with_fixture(&mut entities, BodyDef::new_static(), circle.clone());
        let (_, ghost) = add_body_with_fixture(
            &mut entities,
            BodyDef::new_dynamic(),
            circle.clone().with_filter(Filter::default().with_mask(0)),
        );
        let same_body_fixture = entities.insert_fixture(Fixture::new(ground, &circle));

        // edge against edge
        manager.add_pair(ground_edge, other_edge, &mut entities, &joints);
        // two non-dynamic bodies
        manager.add_pair(ground_edge, static_ball, &mut entities, &joints);
        // masks
        manager.add_pair(ball, ghost, &mut entities, &joints);
        // same body
        manager.add_pair(ground_edge, same_body_fixture, &mut entities, &joints);
        assert!(manager.is_empty());

        manager.add_pair(ground_edge, ball, &mut entities, &joints);
        manager.add_pair(ball, ground_edge, &mut entities, &joints);
        assert_eq!(manager.len(), 1);
        let key = manager.find(ball, ground_edge).unwrap();
        assert_eq!(entities.get_body(ground).unwrap().contacts(), &[key]);

        let mut events = Vec::new();
        manager.destroy(key, &mut entities, &mut events);
        assert!(manager.is_empty());
        assert!(entities.get_body(ground).unwrap().contacts().is_empty());
        // it never touched, so no end event
        assert!(events.is_empty());
    }
}
