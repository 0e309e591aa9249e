use super::{
    collision::Manifold, CommandQueue, Contact, ContactImpulse, EntitySet,
};

/// Receives notifications about contacts during [`step`][super::PhysicsWorld::step].
///
/// Every method has a default implementation that does nothing,
/// so implement only the ones you care about.
///
/// The world can't be modified while it's stepping. Instead, every method gets
/// read access to bodies and fixtures and a [`CommandQueue`] to request changes
/// such as destroying a body. Queued commands are applied at the end of the step,
/// after all events have been delivered.
///
/// Begin, end and post-solve events are buffered and delivered at the end of the step,
/// so the contact they carry is a snapshot taken when the event happened.
/// `pre_solve` is called immediately and can modify the live contact.
pub trait ContactListener {
    /// Two fixtures started touching.
    fn begin_contact(
        &mut self,
        _contact: &Contact,
        _entities: &EntitySet,
        _commands: &mut CommandQueue,
    ) {
    }

    /// Two fixtures stopped touching, or a touching contact was destroyed.
    fn end_contact(
        &mut self,
        _contact: &Contact,
        _entities: &EntitySet,
        _commands: &mut CommandQueue,
    ) {
    }

    /// A sensor started overlapping another fixture.
    fn begin_sensor_overlap(
        &mut self,
        _contact: &Contact,
        _entities: &EntitySet,
        _commands: &mut CommandQueue,
    ) {
    }

    /// A sensor stopped overlapping another fixture.
    fn end_sensor_overlap(
        &mut self,
        _contact: &Contact,
        _entities: &EntitySet,
        _commands: &mut CommandQueue,
    ) {
    }

    /// Called after a touching contact is updated and before it's solved.
    /// Use [`Contact::set_enabled`] to skip solving it this step,
    /// e.g. for one-way platforms.
    fn pre_solve(
        &mut self,
        _contact: &mut Contact,
        _old_manifold: &Manifold,
        _entities: &EntitySet,
        _commands: &mut CommandQueue,
    ) {
    }

    /// Called after a contact has been solved, with the impulses applied.
    fn post_solve(
        &mut self,
        _contact: &Contact,
        _impulse: &ContactImpulse,
        _entities: &EntitySet,
        _commands: &mut CommandQueue,
    ) {
    }
}
