use super::{
    collision::{ProxyId, Shape, AABB},
    error::check_range,
    BodyKey, Result,
};

/// Collision filtering data.
///
/// Two fixtures in the same nonzero group always collide if the group is positive
/// and never collide if it's negative. Otherwise each fixture's category must be
/// included in the other's mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Deserialize, serde::Serialize),
    serde(default)
)]
pub struct Filter {
    pub category_bits: u16,
    pub mask_bits: u16,
    pub group_index: i16,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            category_bits: 0x0001,
            mask_bits: 0xFFFF,
            group_index: 0,
        }
    }
}

impl Filter {
    pub fn with_category(mut self, category_bits: u16) -> Self {
        self.category_bits = category_bits;
        self
    }

    pub fn with_mask(mut self, mask_bits: u16) -> Self {
        self.mask_bits = mask_bits;
        self
    }

    pub fn with_group(mut self, group_index: i16) -> Self {
        self.group_index = group_index;
        self
    }

    pub fn should_collide(&self, other: &Filter) -> bool {
        if self.group_index == other.group_index && self.group_index != 0 {
            return self.group_index > 0;
        }
        (self.mask_bits & other.category_bits) != 0 && (self.category_bits & other.mask_bits) != 0
    }
}

/// Everything needed to create a [`Fixture`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct FixtureDef {
    pub shape: Shape,
    /// Coulomb friction coefficient in [0, 1].
    pub friction: f64,
    /// Bounciness in [0, 1].
    pub restitution: f64,
    /// Mass per unit area.
    pub density: f64,
    /// Sensors detect overlaps but never generate collision responses.
    pub is_sensor: bool,
    pub filter: Filter,
    pub user_data: u64,
}

impl FixtureDef {
    pub fn new(shape: impl Into<Shape>) -> Self {
        Self {
            shape: shape.into(),
            friction: 0.2,
            restitution: 0.0,
            density: 0.0,
            is_sensor: false,
            filter: Filter::default(),
            user_data: 0,
        }
    }

    pub fn with_shape(mut self, shape: impl Into<Shape>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f64) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    pub fn with_sensor(mut self, is_sensor: bool) -> Self {
        self.is_sensor = is_sensor;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    /// Check material properties and the shape's geometry.
    pub fn validate(&self) -> Result<()> {
        check_range("friction", self.friction, 0.0, 1.0)?;
        check_range("restitution", self.restitution, 0.0, 1.0)?;
        check_range("density", self.density, 0.0, f64::MAX)?;
        self.shape.validate()
    }
}

/// A shape attached to a body, along with its material and filtering properties.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub(crate) body: BodyKey,
    pub(crate) shape: Shape,
    pub(crate) friction: f64,
    pub(crate) restitution: f64,
    pub(crate) density: f64,
    pub(crate) is_sensor: bool,
    pub(crate) filter: Filter,
    pub(crate) proxy: Option<ProxyId>,
    /// World AABB covering the body's motion during the last step.
    pub(crate) aabb: AABB,
    pub user_data: u64,
}

impl Fixture {
    pub(crate) fn new(body: BodyKey, def: &FixtureDef) -> Self {
        Self {
            body,
            shape: def.shape.clone(),
            friction: def.friction,
            restitution: def.restitution,
            density: def.density,
            is_sensor: def.is_sensor,
            filter: def.filter,
            proxy: None,
            aabb: AABB::zero(),
            user_data: def.user_data,
        }
    }

    /// The body this fixture is attached to.
    #[inline]
    pub fn body(&self) -> BodyKey {
        self.body
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn friction(&self) -> f64 {
        self.friction
    }

    /// Change the friction coefficient.
    /// Existing contacts keep their mixed value until they're recreated.
    pub fn set_friction(&mut self, friction: f64) -> Result<()> {
        check_range("friction", friction, 0.0, 1.0)?;
        self.friction = friction;
        Ok(())
    }

    #[inline]
    pub fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Change the restitution.
    /// Existing contacts keep their mixed value until they're recreated.
    pub fn set_restitution(&mut self, restitution: f64) -> Result<()> {
        check_range("restitution", restitution, 0.0, 1.0)?;
        self.restitution = restitution;
        Ok(())
    }

    #[inline]
    pub fn density(&self) -> f64 {
        self.density
    }

    #[inline]
    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    #[inline]
    pub fn filter(&self) -> Filter {
        self.filter
    }

    #[inline]
    pub fn aabb(&self) -> AABB {
        self.aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::PhysicsError;

    #[test]
    fn filter_groups_override_masks() {
        let a = Filter::default().with_group(3).with_mask(0);
        let b = Filter::default().with_group(3).with_mask(0);
        assert!(a.should_collide(&b));

        let a = Filter::default().with_group(-3);
        let b = Filter::default().with_group(-3);
        assert!(!a.should_collide(&b));

        // different groups fall back to masks
        let a = Filter::default().with_group(-3);
        let b = Filter::default().with_group(-4);
        assert!(a.should_collide(&b));
    }

    #[test]
    fn filter_masks_must_agree_both_ways() {
        let player = Filter::default().with_category(0b01).with_mask(0b10);
        let wall = Filter::default().with_category(0b10).with_mask(0xFFFF);
        let ghost = Filter::default().with_category(0b100).with_mask(0b01);
        assert!(player.should_collide(&wall));
        assert!(wall.should_collide(&player));
        assert!(!player.should_collide(&ghost));
        assert!(!ghost.should_collide(&player));
    }

    #[test]
    fn def_validation() {
        let def = FixtureDef::new(Shape::circle(1.0).unwrap());
        assert!(def.validate().is_ok());
        assert_eq!(def.friction, 0.2);
        assert_eq!(def.filter, Filter::default());

        for bad in [
            def.clone().with_friction(1.5),
            def.clone().with_restitution(-0.1),
            def.clone().with_density(-1.0),
            def.clone().with_density(f64::NAN),
        ] {
            assert!(matches!(
                bad.validate(),
                Err(PhysicsError::InvalidConfiguration(_))
            ));
        }
    }
}
