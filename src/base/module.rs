use std::sync::Arc;

use crate::base::behavior::*;
use crate::timeq::Cycle;

#[derive(Debug)]
pub struct ModuleBase<C> {
    pub cycle: Cycle,
    pub config: Arc<C>,
}

impl<C> ModuleBase<C> {
    pub fn new(config: Arc<C>) -> Self {
        Self { cycle: 0, config }
    }
}

pub trait IsModule: ModuleBehaviors {
    type ConfigType;

    fn base(&mut self) -> &mut ModuleBase<Self::ConfigType>;

    fn base_ref(&self) -> &ModuleBase<Self::ConfigType>;

    fn conf(&self) -> &Self::ConfigType {
        &self.base_ref().config
    }

    fn now(&self) -> Cycle {
        self.base_ref().cycle
    }
}

/// arguments: identifier, config type
macro_rules! module {
    ($comp:ident, $C:ty) => {
        impl IsModule for $comp {
            type ConfigType = $C;

            fn base(&mut self) -> &mut ModuleBase<$C> {
                &mut self.base
            }

            fn base_ref(&self) -> &ModuleBase<$C> {
                &self.base
            }
        }
    };
}

pub(crate) use module;
