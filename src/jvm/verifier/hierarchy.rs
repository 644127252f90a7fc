use super::types::{CLONEABLE, OBJECT, SERIALIZABLE, THROWABLE};
use crate::jvm::Error;
use elsa::map::FrozenMap;
use std::collections::HashMap;

/// What stack map generation needs to know about a class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassHierarchyInfo {
    pub is_interface: bool,

    /// Only `java/lang/Object` has no superclass (interfaces report `java/lang/Object`)
    pub superclass: Option<String>,
}

impl ClassHierarchyInfo {
    pub fn class(superclass: impl Into<String>) -> ClassHierarchyInfo {
        ClassHierarchyInfo {
            is_interface: false,
            superclass: Some(superclass.into()),
        }
    }

    pub fn interface() -> ClassHierarchyInfo {
        ClassHierarchyInfo {
            is_interface: true,
            superclass: Some(OBJECT.to_owned()),
        }
    }
}

/// Source of class hierarchy information
///
/// Merging two object types at a control flow join requires knowing their common superclass, so
/// the generator needs to be able to ask about classes that aren't in the class file being
/// written.
pub trait ClassHierarchyResolver {
    /// Look up a class by internal name (eg. `java/lang/String`)
    fn resolve(&self, class_name: &str) -> Option<ClassHierarchyInfo>;
}

impl<F> ClassHierarchyResolver for F
where
    F: Fn(&str) -> Option<ClassHierarchyInfo>,
{
    fn resolve(&self, class_name: &str) -> Option<ClassHierarchyInfo> {
        self(class_name)
    }
}

/// Class hierarchy resolver backed by a map
#[derive(Clone, Debug, Default)]
pub struct ClassHierarchy {
    classes: HashMap<String, ClassHierarchyInfo>,
}

impl ClassHierarchy {
    pub fn new() -> ClassHierarchy {
        ClassHierarchy::default()
    }

    /// Hierarchy pre-populated with the core classes generated code tends to touch
    pub fn with_java_lang() -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.add(
            OBJECT,
            ClassHierarchyInfo {
                is_interface: false,
                superclass: None,
            },
        );
        for interface in [
            CLONEABLE,
            SERIALIZABLE,
            "java/lang/Comparable",
            "java/lang/CharSequence",
            "java/lang/Runnable",
            "java/lang/AutoCloseable",
            "java/lang/Iterable",
        ] {
            hierarchy.add(interface, ClassHierarchyInfo::interface());
        }
        for (class, superclass) in [
            ("java/lang/String", OBJECT),
            ("java/lang/Class", OBJECT),
            ("java/lang/Number", OBJECT),
            ("java/lang/Boolean", OBJECT),
            ("java/lang/Character", OBJECT),
            ("java/lang/Byte", "java/lang/Number"),
            ("java/lang/Short", "java/lang/Number"),
            ("java/lang/Integer", "java/lang/Number"),
            ("java/lang/Long", "java/lang/Number"),
            ("java/lang/Float", "java/lang/Number"),
            ("java/lang/Double", "java/lang/Number"),
            ("java/lang/AbstractStringBuilder", OBJECT),
            ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
            ("java/lang/System", OBJECT),
            ("java/lang/Math", OBJECT),
            ("java/lang/Thread", OBJECT),
            (THROWABLE, OBJECT),
            ("java/lang/Exception", THROWABLE),
            ("java/lang/Error", THROWABLE),
            ("java/lang/RuntimeException", "java/lang/Exception"),
            ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
            ("java/lang/ClassCastException", "java/lang/RuntimeException"),
            ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
            ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
            ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
            ("java/lang/NullPointerException", "java/lang/RuntimeException"),
            ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
            ("java/lang/invoke/MethodHandle", OBJECT),
            ("java/lang/invoke/MethodType", OBJECT),
            ("java/lang/invoke/CallSite", OBJECT),
            ("java/lang/invoke/MethodHandles$Lookup", OBJECT),
        ] {
            hierarchy.add_class(class, superclass);
        }
        hierarchy
    }

    pub fn add(&mut self, class_name: impl Into<String>, info: ClassHierarchyInfo) {
        self.classes.insert(class_name.into(), info);
    }

    pub fn add_class(&mut self, class_name: impl Into<String>, superclass: impl Into<String>) {
        self.add(class_name, ClassHierarchyInfo::class(superclass));
    }

    pub fn add_interface(&mut self, class_name: impl Into<String>) {
        self.add(class_name, ClassHierarchyInfo::interface());
    }
}

impl ClassHierarchyResolver for ClassHierarchy {
    fn resolve(&self, class_name: &str) -> Option<ClassHierarchyInfo> {
        self.classes.get(class_name).cloned()
    }
}

/// Resolver that remembers every answer it got
///
/// Answers are handed out by reference from `&self`, so that ancestor walks don't need to clone
/// anything or hold a mutable borrow.
pub struct CachedResolver<'r> {
    resolver: &'r dyn ClassHierarchyResolver,
    cache: FrozenMap<String, Box<ClassHierarchyInfo>>,
}

impl<'r> CachedResolver<'r> {
    pub fn new(resolver: &'r dyn ClassHierarchyResolver) -> CachedResolver<'r> {
        CachedResolver {
            resolver,
            cache: FrozenMap::new(),
        }
    }

    pub fn resolve(&self, class_name: &str) -> Result<&ClassHierarchyInfo, Error> {
        if let Some(info) = self.cache.get(class_name) {
            return Ok(info);
        }
        let info = match self.resolver.resolve(class_name) {
            Some(info) => info,
            None if class_name == OBJECT => ClassHierarchyInfo {
                is_interface: false,
                superclass: None,
            },
            None => return Err(Error::UnresolvedClass(class_name.to_owned())),
        };
        log::trace!("resolved {}: {:?}", class_name, info);
        Ok(self.cache.insert(class_name.to_owned(), Box::new(info)))
    }

    pub fn is_interface(&self, class_name: &str) -> Result<bool, Error> {
        Ok(self.resolve(class_name)?.is_interface)
    }

    /// Superclasses of a class, starting with the class itself and ending with `java/lang/Object`
    fn ancestors<'a>(&'a self, class_name: &'a str) -> Result<Vec<&'a str>, Error> {
        let mut chain = vec![class_name];
        let mut current = class_name;
        while let Some(superclass) = self.resolve(current)?.superclass.as_deref() {
            if chain.contains(&superclass) {
                break;
            }
            chain.push(superclass);
            current = superclass;
        }
        Ok(chain)
    }

    /// Nearest class both classes extend
    ///
    /// Interfaces only have `java/lang/Object` in common with anything. `None` means the two
    /// superclass chains never meet (which only happens with an inconsistent resolver).
    pub fn common_ancestor(&self, class1: &str, class2: &str) -> Result<Option<String>, Error> {
        if self.is_interface(class1)? || self.is_interface(class2)? {
            return Ok(Some(OBJECT.to_owned()));
        }
        let chain1 = self.ancestors(class1)?;
        let chain2 = self.ancestors(class2)?;

        // Walk down from the root while the chains agree
        let common = chain1
            .iter()
            .rev()
            .zip(chain2.iter().rev())
            .take_while(|(a, b)| a == b)
            .last()
            .map(|(a, _)| (*a).to_owned());
        Ok(common)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn common_ancestors() {
        let mut classes = ClassHierarchy::with_java_lang();
        classes.add_class("A", OBJECT);
        classes.add_class("B", "A");
        classes.add_class("C", "B");
        classes.add_class("D", "A");
        classes.add_interface("I");
        let resolver = CachedResolver::new(&classes);

        let ancestor = |a, b| resolver.common_ancestor(a, b).unwrap();
        assert_eq!(ancestor("C", "D"), Some("A".to_owned()));
        assert_eq!(ancestor("C", "B"), Some("B".to_owned()));
        assert_eq!(ancestor("C", "C"), Some("C".to_owned()));
        assert_eq!(ancestor("C", "java/lang/String"), Some(OBJECT.to_owned()));
        assert_eq!(ancestor("I", "C"), Some(OBJECT.to_owned()));
        assert_eq!(
            ancestor("java/lang/ArithmeticException", "java/lang/NullPointerException"),
            Some("java/lang/RuntimeException".to_owned())
        );
        assert!(resolver.common_ancestor("C", "Nope").is_err());
    }

    #[test]
    fn closures_resolve() {
        let lenient = |name: &str| {
            if name == "Special" {
                Some(ClassHierarchyInfo::interface())
            } else {
                Some(ClassHierarchyInfo::class(OBJECT))
            }
        };
        let resolver = CachedResolver::new(&lenient);
        assert!(resolver.is_interface("Special").unwrap());
        assert!(!resolver.is_interface("Anything").unwrap());

        // `java/lang/Object` is the root even if the resolver says otherwise
        assert_eq!(resolver.ancestors("Anything").unwrap(), vec!["Anything", OBJECT]);
    }

    #[test]
    fn object_always_resolves() {
        let empty = ClassHierarchy::new();
        let resolver = CachedResolver::new(&empty);
        assert_eq!(resolver.resolve(OBJECT).unwrap().superclass, None);
        assert!(resolver.resolve("java/lang/String").is_err());
    }
}
