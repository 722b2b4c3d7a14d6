//! Combat-AI stages layered on top of navigation: target acquisition,
//! ally pings, melee ring-slot booking, the per-unit decision state
//! machine, and damage resolution with death, regeneration and hit
//! recovery.

pub(crate) mod damage;
pub(crate) mod decision;
pub(crate) mod slots;
pub(crate) mod threat;
