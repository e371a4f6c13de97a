//! Prototype registry: an append-only builder sealed into an immutable catalog.

use std::{collections::HashMap, fmt, sync::Arc};

use smallvec::SmallVec;

use pixpipe_core::prelude::PixelFormat;

use crate::{
    BoundTransform, CostEstimate, Family, PrototypeDescriptor, StageSpec, TransformError,
    TransformFactory, VariantFlags,
};

/// Registration handle, dense in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrototypeId(u32);

impl PrototypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PrototypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered prototype: descriptor plus factory.
#[derive(Clone)]
pub struct Prototype {
    id: PrototypeId,
    descriptor: PrototypeDescriptor,
    factory: Arc<dyn TransformFactory>,
}

impl Prototype {
    pub fn id(&self) -> PrototypeId {
        self.id
    }

    pub fn descriptor(&self) -> &PrototypeDescriptor {
        &self.descriptor
    }

    pub fn family(&self) -> Family {
        self.descriptor.family
    }

    pub fn src(&self) -> PixelFormat {
        self.descriptor.src
    }

    pub fn dst(&self) -> PixelFormat {
        self.descriptor.dst
    }

    pub fn flags(&self) -> VariantFlags {
        self.descriptor.flags
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Price a stage; the prototype's own flags are applied to `spec`.
    pub fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError> {
        self.factory.estimate(&spec.with_flags(self.descriptor.flags))
    }

    /// Instantiate for a stage; the prototype's own flags are applied to `spec`.
    pub fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
        self.factory.bind(&spec.with_flags(self.descriptor.flags))
    }
}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototype")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Errors surfaced by the registry.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::PixelFormat;
/// use pixpipe_transform::{Family, VariantFlags, registry::RegistryError};
///
/// let err = RegistryError::NotFound {
///     family: Family::Identity,
///     src: PixelFormat::Grey,
///     dst: PixelFormat::Grey,
///     flags: VariantFlags::NONE,
/// };
/// assert_eq!(err.code(), "not_found");
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("prototype {name} duplicates {existing} for {family} {src} -> {dst}")]
    Duplicate {
        existing: PrototypeId,
        name: &'static str,
        family: Family,
        src: PixelFormat,
        dst: PixelFormat,
    },
    #[error("invalid prototype {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("no {family} prototype for {src} -> {dst} with flags {flags:?}")]
    NotFound {
        family: Family,
        src: PixelFormat,
        dst: PixelFormat,
        flags: VariantFlags,
    },
}

impl RegistryError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Duplicate { .. } => "duplicate",
            RegistryError::Invalid { .. } => "invalid",
            RegistryError::NotFound { .. } => "not_found",
        }
    }
}

type ExactKey = (Family, PixelFormat, PixelFormat, VariantFlags);

/// Append phase of the registry.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use pixpipe_transform::prelude::*;
///
/// let mut builder = RegistryBuilder::new();
/// let desc = PrototypeDescriptor::new(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey, "hflip");
/// let id = builder
///     .register(desc.clone(), Arc::new(PrimitiveFactory::for_descriptor(&desc).unwrap()))
///     .unwrap();
/// let registry = builder.seal();
/// assert_eq!(registry.get(id).unwrap().name(), "hflip");
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    prototypes: Vec<Prototype>,
    exact: HashMap<ExactKey, PrototypeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-populated with the built-in primitive set.
    pub fn with_builtin() -> Self {
        let mut builder = Self::new();
        crate::builtin::register_builtin(&mut builder);
        builder
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Append a prototype.
    pub fn register(
        &mut self,
        descriptor: PrototypeDescriptor,
        factory: Arc<dyn TransformFactory>,
    ) -> Result<PrototypeId, RegistryError> {
        validate_descriptor(&descriptor)?;
        let key = (
            descriptor.family,
            descriptor.src,
            descriptor.dst,
            descriptor.flags,
        );
        if let Some(existing) = self.exact.get(&key) {
            return Err(RegistryError::Duplicate {
                existing: *existing,
                name: descriptor.name,
                family: descriptor.family,
                src: descriptor.src,
                dst: descriptor.dst,
            });
        }
        let index = u32::try_from(self.prototypes.len()).map_err(|_| RegistryError::Invalid {
            name: descriptor.name,
            reason: "registry is full".into(),
        })?;
        let id = PrototypeId(index);
        tracing::trace!(
            %id,
            family = %descriptor.family,
            src = %descriptor.src,
            dst = %descriptor.dst,
            name = descriptor.name,
            "registered prototype"
        );
        self.exact.insert(key, id);
        self.prototypes.push(Prototype {
            id,
            descriptor,
            factory,
        });
        Ok(id)
    }

    /// Convenience wrapper taking the factory by value.
    pub fn register_factory<F: TransformFactory>(
        &mut self,
        descriptor: PrototypeDescriptor,
        factory: F,
    ) -> Result<PrototypeId, RegistryError> {
        self.register(descriptor, Arc::new(factory))
    }

    /// End the append phase.
    pub fn seal(self) -> TransformRegistry {
        let mut by_source: HashMap<(Family, PixelFormat), SmallVec<[PrototypeId; 4]>> =
            HashMap::new();
        for proto in &self.prototypes {
            by_source
                .entry((proto.family(), proto.src()))
                .or_default()
                .push(proto.id);
        }
        tracing::debug!(prototypes = self.prototypes.len(), "registry sealed");
        TransformRegistry {
            prototypes: self.prototypes,
            by_source,
        }
    }
}

fn validate_descriptor(descriptor: &PrototypeDescriptor) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::Invalid {
        name: descriptor.name,
        reason: reason.into(),
    };
    match descriptor.family {
        Family::Identity if descriptor.src != descriptor.dst => {
            Err(invalid("identity prototypes must keep the format"))
        }
        Family::FormatConversion if descriptor.src == descriptor.dst => {
            Err(invalid("format conversion must change the format"))
        }
        _ if descriptor.name.is_empty() => Err(invalid("empty name")),
        _ => Ok(()),
    }
}

/// Sealed, read-only prototype catalog.
///
/// Share it as `Arc<TransformRegistry>` between planners; no method mutates it.
///
/// # Example
/// ```rust
/// use pixpipe_transform::prelude::*;
///
/// let registry = TransformRegistry::builtin();
/// let proto = registry
///     .lookup(Family::FormatConversion, PixelFormat::Yuv420, PixelFormat::Rgb24, VariantFlags::INTEGER)
///     .unwrap();
/// assert_eq!(proto.flags(), VariantFlags::INTEGER);
/// assert!(registry.query(Some(Family::HFlip), None, None).count() > 0);
/// ```
pub struct TransformRegistry {
    prototypes: Vec<Prototype>,
    by_source: HashMap<(Family, PixelFormat), SmallVec<[PrototypeId; 4]>>,
}

impl TransformRegistry {
    /// Sealed registry with nothing registered.
    pub fn empty() -> Self {
        RegistryBuilder::new().seal()
    }

    /// Sealed registry holding the built-in primitive set.
    pub fn builtin() -> Self {
        RegistryBuilder::with_builtin().seal()
    }

    /// Start a new append phase from a copy of this registry.
    pub fn to_builder(&self) -> RegistryBuilder {
        let exact = self
            .prototypes
            .iter()
            .map(|p| ((p.family(), p.src(), p.dst(), p.flags()), p.id))
            .collect();
        RegistryBuilder {
            prototypes: self.prototypes.clone(),
            exact,
        }
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    pub fn get(&self, id: PrototypeId) -> Option<&Prototype> {
        self.prototypes.get(id.index())
    }

    /// All prototypes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.iter()
    }

    /// Prototypes of `family` accepting `src`, in registration order.
    pub fn from_source(&self, family: Family, src: PixelFormat) -> impl Iterator<Item = &Prototype> {
        self.by_source
            .get(&(family, src))
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.get(*id))
    }

    /// Filter by any combination of family, source and destination.
    pub fn query(
        &self,
        family: Option<Family>,
        src: Option<PixelFormat>,
        dst: Option<PixelFormat>,
    ) -> impl Iterator<Item = &Prototype> {
        self.prototypes.iter().filter(move |p| {
            family.is_none_or(|f| p.family() == f)
                && src.is_none_or(|s| p.src() == s)
                && dst.is_none_or(|d| p.dst() == d)
        })
    }

    /// Resolve a prototype by format pair and option flags.
    ///
    /// Candidates must carry every requested flag; an exact flag match wins and
    /// registration order breaks remaining ties.
    pub fn lookup(
        &self,
        family: Family,
        src: PixelFormat,
        dst: PixelFormat,
        flags: VariantFlags,
    ) -> Result<&Prototype, RegistryError> {
        let mut fallback = None;
        for proto in self.from_source(family, src).filter(|p| p.dst() == dst) {
            if proto.flags() == flags {
                return Ok(proto);
            }
            if fallback.is_none() && proto.flags().contains(flags) {
                fallback = Some(proto);
            }
        }
        fallback.ok_or(RegistryError::NotFound {
            family,
            src,
            dst,
            flags,
        })
    }

    /// Descriptors of every registered prototype.
    pub fn list_registered(&self) -> Vec<PrototypeDescriptor> {
        self.prototypes.iter().map(|p| p.descriptor.clone()).collect()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("prototypes", &self.prototypes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StageOp, primitive::PrimitiveFactory};

    struct Priced(CostEstimate);

    impl TransformFactory for Priced {
        fn estimate(&self, _spec: &StageSpec) -> Result<CostEstimate, TransformError> {
            Ok(self.0)
        }

        fn bind(&self, _spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
            Err(TransformError::Construction("estimate-only".into()))
        }
    }

    fn make_desc(family: Family, src: PixelFormat, dst: PixelFormat) -> PrototypeDescriptor {
        PrototypeDescriptor::new(family, src, dst, "test")
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut builder = RegistryBuilder::new();
        let desc = make_desc(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey);
        let first = builder
            .register_factory(desc.clone(), Priced(CostEstimate::new(1, 1.0)))
            .unwrap();
        let err = builder
            .register_factory(desc.clone(), Priced(CostEstimate::new(2, 1.0)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { existing, .. } if existing == first));
        // Same format pair with different flags is a distinct variant.
        builder
            .register_factory(
                desc.flags(VariantFlags::EXTERNAL),
                Priced(CostEstimate::new(2, 1.0)),
            )
            .unwrap();
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let mut builder = RegistryBuilder::new();
        let err = builder
            .register_factory(
                make_desc(Family::Identity, PixelFormat::Grey, PixelFormat::Rgb24),
                Priced(CostEstimate::new(1, 1.0)),
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid");
        let err = builder
            .register_factory(
                make_desc(Family::FormatConversion, PixelFormat::Grey, PixelFormat::Grey),
                Priced(CostEstimate::new(1, 1.0)),
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid");
        assert!(builder.is_empty());
    }

    #[test]
    fn lookup_disambiguates_by_flags() {
        let mut builder = RegistryBuilder::new();
        let base = make_desc(Family::FormatConversion, PixelFormat::Yuv420, PixelFormat::Rgb24);
        let fast = builder
            .register_factory(base.clone().flags(VariantFlags::FAST), Priced(CostEstimate::new(4, 0.97)))
            .unwrap();
        let float = builder
            .register_factory(base.clone().flags(VariantFlags::FLOAT), Priced(CostEstimate::new(12, 1.0)))
            .unwrap();
        let registry = builder.seal();

        let pick = |flags| {
            registry
                .lookup(Family::FormatConversion, PixelFormat::Yuv420, PixelFormat::Rgb24, flags)
                .map(|p| p.id())
        };
        assert_eq!(pick(VariantFlags::FLOAT), Ok(float));
        assert_eq!(pick(VariantFlags::FAST), Ok(fast));
        // No exact match: registration order decides among supersets.
        assert_eq!(pick(VariantFlags::NONE), Ok(fast));
        assert!(matches!(
            pick(VariantFlags::INTEGER),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn query_wildcards_filter_independently() {
        let registry = TransformRegistry::builtin();
        let total = registry.query(None, None, None).count();
        assert_eq!(total, registry.len());
        assert!(
            registry
                .query(Some(Family::Rotate90), Some(PixelFormat::Yuyv), None)
                .next()
                .is_none()
        );
        assert!(
            registry
                .query(None, None, Some(PixelFormat::Grey))
                .all(|p| p.dst() == PixelFormat::Grey)
        );
        let grey_ids: Vec<_> = registry
            .from_source(Family::HFlip, PixelFormat::Grey)
            .map(|p| p.id())
            .collect();
        assert_eq!(grey_ids.len(), 1);
    }

    #[test]
    fn to_builder_keeps_original_untouched() {
        let registry = TransformRegistry::builtin();
        let before = registry.len();
        let mut builder = registry.to_builder();
        let desc = make_desc(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey)
            .flags(VariantFlags::EXTERNAL);
        builder
            .register(desc.clone(), Arc::new(PrimitiveFactory::for_descriptor(&desc).unwrap()))
            .unwrap();
        let extended = builder.seal();
        assert_eq!(registry.len(), before);
        assert_eq!(extended.len(), before + 1);
        let spec = StageSpec::new(
            PixelFormat::Grey,
            PixelFormat::Grey,
            pixpipe_core::prelude::Resolution::new(2, 2).unwrap(),
            StageOp::HFlip,
        )
        .unwrap();
        let proto = extended
            .lookup(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey, VariantFlags::EXTERNAL)
            .unwrap();
        assert!(proto.estimate(&spec).is_ok());
    }

    #[test]
    fn list_registered_follows_registration_order() {
        let mut builder = RegistryBuilder::new();
        let hflip = make_desc(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey);
        let swap = make_desc(Family::FormatConversion, PixelFormat::Rgb24, PixelFormat::Bgr24)
            .flags(VariantFlags::EXTERNAL);
        builder
            .register_factory(hflip.clone(), Priced(CostEstimate::new(1, 1.0)))
            .unwrap();
        builder
            .register_factory(swap.clone(), Priced(CostEstimate::new(2, 1.0)))
            .unwrap();
        let registry = builder.seal();
        assert_eq!(registry.list_registered(), vec![hflip, swap]);
        assert!(TransformRegistry::empty().list_registered().is_empty());
    }
}
