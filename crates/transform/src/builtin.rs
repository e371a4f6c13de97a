use pixpipe_core::prelude::PixelFormat;

use crate::{
    Family, PrototypeDescriptor, QualityTier,
    primitive::{Conversion, PrimitiveFactory},
    registry::{RegistryBuilder, RegistryError},
};

/// Register every built-in prototype into `builder`.
///
/// Keys the builder already holds are left in place, so providers registered
/// earlier take precedence. Returns how many prototypes were added.
///
/// # Example
/// ```rust
/// use pixpipe_transform::prelude::*;
///
/// let mut builder = RegistryBuilder::new();
/// let added = register_builtin(&mut builder);
/// assert_eq!(added, builder.len());
/// assert_eq!(register_builtin(&mut builder), 0);
/// ```
pub fn register_builtin(builder: &mut RegistryBuilder) -> usize {
    let mut added = 0;
    let mut add = |descriptor: PrototypeDescriptor, factory: PrimitiveFactory| {
        match builder.register_factory(descriptor, factory) {
            Ok(_) => added += 1,
            Err(RegistryError::Duplicate { existing, name, .. }) => {
                tracing::trace!(%existing, name, "built-in prototype shadowed");
            }
            Err(err) => tracing::warn!(error = %err, "built-in prototype rejected"),
        }
    };

    for format in PixelFormat::ALL {
        add(
            PrototypeDescriptor::new(Family::Identity, format, format, "copy"),
            PrimitiveFactory::identity(),
        );
    }

    for src in PixelFormat::ALL {
        for dst in PixelFormat::ALL {
            let Some(conversion) = Conversion::between(src, dst) else {
                continue;
            };
            let base = PrototypeDescriptor::new(Family::FormatConversion, src, dst, conversion.name());
            if conversion.is_tiered() {
                for tier in QualityTier::ALL {
                    add(
                        base.clone().flags(tier.flags()),
                        PrimitiveFactory::conversion(conversion),
                    );
                }
            } else {
                add(base, PrimitiveFactory::conversion(conversion));
            }
        }
    }

    for format in PixelFormat::ALL {
        for family in Family::ALL.into_iter().filter(|f| f.is_geometric()) {
            let descriptor = PrototypeDescriptor::new(family, format, format, family.name());
            if let Some(factory) = PrimitiveFactory::for_descriptor(&descriptor) {
                add(descriptor, factory);
            }
        }
    }

    #[cfg(feature = "image")]
    {
        added += crate::jpeg::register_jpeg(builder);
    }

    tracing::debug!(added, "built-in prototypes registered");
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VariantFlags, registry::TransformRegistry};

    #[test]
    fn yuv_to_rgb_has_one_variant_per_tier() {
        let registry = TransformRegistry::builtin();
        let variants: Vec<_> = registry
            .query(
                Some(Family::FormatConversion),
                Some(PixelFormat::Yvyu),
                Some(PixelFormat::Bgr24),
            )
            .map(|p| p.flags().tier())
            .collect();
        assert_eq!(
            variants,
            QualityTier::ALL.map(Some).to_vec()
        );
    }

    #[test]
    fn geometry_skips_packed_422_and_compressed() {
        let registry = TransformRegistry::builtin();
        for format in [PixelFormat::Yuyv, PixelFormat::Vyuy, PixelFormat::Jpeg] {
            assert!(
                registry
                    .query(Some(Family::Rotate90), Some(format), None)
                    .next()
                    .is_none()
            );
        }
        assert_eq!(
            registry.query(Some(Family::VFlip), None, None).count(),
            10
        );
    }

    #[test]
    fn identity_registered_for_every_format() {
        let registry = TransformRegistry::builtin();
        for format in PixelFormat::ALL {
            let proto = registry
                .lookup(Family::Identity, format, format, VariantFlags::NONE)
                .unwrap();
            assert_eq!(proto.name(), "copy");
        }
    }

    #[test]
    fn earlier_registrations_shadow_builtins() {
        let mut builder = RegistryBuilder::new();
        let desc = PrototypeDescriptor::new(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey, "mine")
            .impl_name("custom");
        builder
            .register_factory(desc, PrimitiveFactory::geometry(Family::HFlip))
            .unwrap();
        register_builtin(&mut builder);
        let registry = builder.seal();
        let proto = registry
            .lookup(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey, VariantFlags::NONE)
            .unwrap();
        assert_eq!(proto.descriptor().impl_name, "custom");
    }
}
