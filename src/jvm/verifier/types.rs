use super::CachedResolver;
use crate::jvm::{BaseType, Error, FieldType, RefType, RenderDescriptor};
use std::fmt;
use std::rc::Rc;

pub const OBJECT: &str = "java/lang/Object";
pub const THROWABLE: &str = "java/lang/Throwable";
pub const STRING: &str = "java/lang/String";
pub const CLASS: &str = "java/lang/Class";
pub const METHOD_HANDLE: &str = "java/lang/invoke/MethodHandle";
pub const METHOD_TYPE: &str = "java/lang/invoke/MethodType";
pub const CLONEABLE: &str = "java/lang/Cloneable";
pub const SERIALIZABLE: &str = "java/io/Serializable";

/// Type of a local variable or stack slot during stack map generation
///
/// These types are from [this hierarchy][0], with a couple additions:
///
///   - `long` and `double` take two slots. The second slot is `Long2`/`Double2`, so that every
///     slot has a type and the two halves can't be separated silently.
///
///   - the small integer types only ever show up as array components, so that `[Z` and `[B`
///     aren't conflated when arrays get merged
///
/// Object types are named the way class constants name them: internal names for classes
/// (`java/lang/String`) and descriptors for arrays (`[Ljava/lang/String;`).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1.2
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Top,
    Integer,
    Float,
    Long,
    Long2,
    Double,
    Double2,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object created by the `new` at this offset, whose constructor has not been called yet
    Uninitialized(u16),
    Object(Rc<str>),
    Boolean,
    Byte,
    Char,
    Short,
}

impl Type {
    pub fn object(name: &str) -> Type {
        Type::Object(Rc::from(name))
    }

    /// Type of a value with this descriptor, once it is on the stack or in a local
    ///
    /// Category 2 types return only their first slot.
    pub fn from_field_type(field_type: &FieldType) -> Type {
        match field_type {
            FieldType::Base(BaseType::Long) => Type::Long,
            FieldType::Base(BaseType::Double) => Type::Double,
            FieldType::Base(BaseType::Float) => Type::Float,
            FieldType::Base(_) => Type::Integer,
            FieldType::Ref(RefType::Object(name)) => Type::object(name),
            FieldType::Ref(array) => Type::object(&array.render()),
        }
    }

    pub fn is_category2(&self) -> bool {
        matches!(self, Type::Long | Type::Double)
    }

    /// Second slot of a category 2 type
    pub fn second_slot(&self) -> Option<Type> {
        match self {
            Type::Long => Some(Type::Long2),
            Type::Double => Some(Type::Double2),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Null | Type::UninitializedThis | Type::Uninitialized(_) | Type::Object(_)
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Object(name) if name.starts_with('['))
    }

    /// Class type (not an array)
    pub fn is_object(&self) -> bool {
        matches!(self, Type::Object(name) if !name.starts_with('['))
    }

    /// Type of the elements of an array type
    ///
    /// `null` is its own component since `aaload` on `null` pushes `null` (before throwing).
    pub fn component(&self) -> Option<Type> {
        let name = match self {
            Type::Null => return Some(Type::Null),
            Type::Object(name) => name.strip_prefix('[')?,
            _ => return None,
        };
        Some(match name.as_bytes().first()? {
            b'Z' => Type::Boolean,
            b'B' => Type::Byte,
            b'C' => Type::Char,
            b'S' => Type::Short,
            b'I' => Type::Integer,
            b'J' => Type::Long,
            b'F' => Type::Float,
            b'D' => Type::Double,
            b'[' => Type::object(name),
            b'L' => Type::object(name.strip_prefix('L')?.strip_suffix(';')?),
            _ => return None,
        })
    }

    /// Type of an array whose elements have this type
    pub fn to_array(&self) -> Option<Type> {
        let name = match self {
            Type::Boolean => "[Z".to_owned(),
            Type::Byte => "[B".to_owned(),
            Type::Char => "[C".to_owned(),
            Type::Short => "[S".to_owned(),
            Type::Integer => "[I".to_owned(),
            Type::Long => "[J".to_owned(),
            Type::Float => "[F".to_owned(),
            Type::Double => "[D".to_owned(),
            Type::Object(name) if name.starts_with('[') => format!("[{}", name),
            Type::Object(name) => format!("[L{};", name),
            _ => return None,
        };
        Some(Type::object(&name))
    }

    /// Merge `from` into `self`, producing the most precise type both are assignable to
    ///
    /// The merge is not symmetric when interfaces are involved: an interface absorbs any
    /// non-array type merged into it, since the verifier treats interfaces like `Object`.
    pub fn merge(&self, from: &Type, hierarchy: &CachedResolver) -> Result<Type, Error> {
        if *self == Type::Top || self == from {
            return Ok(self.clone());
        }
        match self {
            Type::Boolean | Type::Byte | Type::Char | Type::Short => {
                if *from == Type::Integer {
                    Ok(self.clone())
                } else {
                    Ok(Type::Top)
                }
            }
            Type::Null | Type::Object(_) if matches!(from, Type::Null | Type::Object(_)) => {
                self.merge_reference(from, hierarchy)
            }
            _ => Ok(Type::Top),
        }
    }

    fn merge_reference(&self, from: &Type, hierarchy: &CachedResolver) -> Result<Type, Error> {
        if *from == Type::Null {
            return Ok(self.clone());
        }
        if *self == Type::Null || self == from {
            return Ok(from.clone());
        }

        if let Type::Object(name) = self {
            if self.is_object() {
                if &**name == OBJECT {
                    return Ok(self.clone());
                }
                if hierarchy.is_interface(name)? {
                    if !from.is_array() || &**name == CLONEABLE || &**name == SERIALIZABLE {
                        return Ok(self.clone());
                    }
                } else if let Type::Object(from_name) = from {
                    if from.is_object() {
                        return Ok(match hierarchy.common_ancestor(name, from_name)? {
                            Some(ancestor) => Type::object(&ancestor),
                            None => self.clone(),
                        });
                    }
                }
            } else if from.is_array() {
                if let (Some(this_component), Some(from_component)) =
                    (self.component(), from.component())
                {
                    if this_component.is_reference() && from_component.is_reference() {
                        let merged = this_component.merge_reference(&from_component, hierarchy)?;
                        if let Some(array) = merged.to_array() {
                            return Ok(array);
                        }
                    }
                }
            }
        }
        Ok(Type::object(OBJECT))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Top => f.write_str("top"),
            Type::Integer => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Long => f.write_str("long"),
            Type::Long2 => f.write_str("long2"),
            Type::Double => f.write_str("double"),
            Type::Double2 => f.write_str("double2"),
            Type::Null => f.write_str("null"),
            Type::UninitializedThis => f.write_str("uninitializedThis"),
            Type::Uninitialized(offset) => write!(f, "uninitialized({})", offset),
            Type::Object(name) => f.write_str(name),
            Type::Boolean => f.write_str("boolean"),
            Type::Byte => f.write_str("byte"),
            Type::Char => f.write_str("char"),
            Type::Short => f.write_str("short"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::{ClassHierarchy, ClassHierarchyInfo};

    fn hierarchy() -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::with_java_lang();
        hierarchy.add_class("Animal", OBJECT);
        hierarchy.add_class("Dog", "Animal");
        hierarchy.add_class("Cat", "Animal");
        hierarchy.add_class("Puppy", "Dog");
        hierarchy.add(
            "Pet",
            ClassHierarchyInfo {
                is_interface: true,
                superclass: Some(OBJECT.to_owned()),
            },
        );
        hierarchy
    }

    #[test]
    fn lattice_laws() {
        let classes = hierarchy();
        let resolver = CachedResolver::new(&classes);
        let samples = [
            Type::Top,
            Type::Integer,
            Type::Float,
            Type::Long,
            Type::Null,
            Type::Boolean,
            Type::object("Dog"),
            Type::object("[I"),
            Type::Uninitialized(3),
        ];
        for a in &samples {
            assert_eq!(a.merge(a, &resolver).unwrap(), *a);
            assert_eq!(a.merge(&Type::Top, &resolver).unwrap(), Type::Top);
            assert_eq!(Type::Top.merge(a, &resolver).unwrap(), Type::Top);
        }
    }

    #[test]
    fn primitive_mismatches_commute() {
        let classes = hierarchy();
        let resolver = CachedResolver::new(&classes);
        let primitives = [Type::Integer, Type::Float, Type::Long, Type::Double];
        for a in &primitives {
            for b in &primitives {
                let ab = a.merge(b, &resolver).unwrap();
                assert_eq!(ab, b.merge(a, &resolver).unwrap());
                if a != b {
                    assert_eq!(ab, Type::Top);
                }
            }
        }
    }

    #[test]
    fn small_integers() {
        let classes = hierarchy();
        let resolver = CachedResolver::new(&classes);
        assert_eq!(
            Type::Byte.merge(&Type::Integer, &resolver).unwrap(),
            Type::Byte
        );
        assert_eq!(Type::Byte.merge(&Type::Char, &resolver).unwrap(), Type::Top);
        assert_eq!(
            Type::Boolean.merge(&Type::Float, &resolver).unwrap(),
            Type::Top
        );
    }

    #[test]
    fn references() {
        let classes = hierarchy();
        let resolver = CachedResolver::new(&classes);
        let merge = |a: &str, b: &str| {
            let ab = Type::object(a).merge(&Type::object(b), &resolver).unwrap();
            let ba = Type::object(b).merge(&Type::object(a), &resolver).unwrap();
            (ab, ba)
        };

        assert_eq!(merge("Dog", "Cat"), (Type::object("Animal"), Type::object("Animal")));
        assert_eq!(merge("Puppy", "Cat"), (Type::object("Animal"), Type::object("Animal")));
        assert_eq!(merge("Puppy", "Dog"), (Type::object("Dog"), Type::object("Dog")));
        assert_eq!(merge("Dog", OBJECT), (Type::object(OBJECT), Type::object(OBJECT)));
        assert_eq!(
            merge("[LDog;", "[LCat;"),
            (Type::object("[LAnimal;"), Type::object("[LAnimal;"))
        );
        assert_eq!(merge("[I", "[Z"), (Type::object(OBJECT), Type::object(OBJECT)));
        assert_eq!(merge("[I", "Dog").0, Type::object(OBJECT));

        let null = Type::Null;
        assert_eq!(null.merge(&Type::object("Dog"), &resolver).unwrap(), Type::object("Dog"));
        assert_eq!(Type::object("Dog").merge(&null, &resolver).unwrap(), Type::object("Dog"));
    }

    #[test]
    fn interfaces() {
        let classes = hierarchy();
        let resolver = CachedResolver::new(&classes);
        let pet = Type::object("Pet");
        assert_eq!(pet.merge(&Type::object("Dog"), &resolver).unwrap(), pet);
        assert_eq!(
            pet.merge(&Type::object("[LDog;"), &resolver).unwrap(),
            Type::object(OBJECT)
        );
        let cloneable = Type::object(CLONEABLE);
        assert_eq!(
            cloneable.merge(&Type::object("[I"), &resolver).unwrap(),
            cloneable
        );
    }

    #[test]
    fn unknown_classes_are_errors() {
        let classes = hierarchy();
        let resolver = CachedResolver::new(&classes);
        assert!(matches!(
            Type::object("Mystery").merge(&Type::object("Dog"), &resolver),
            Err(Error::UnresolvedClass(name)) if name == "Mystery"
        ));
    }

    #[test]
    fn arrays() {
        assert_eq!(Type::object("[[I").component(), Some(Type::object("[I")));
        assert_eq!(Type::object("[Z").component(), Some(Type::Boolean));
        assert_eq!(
            Type::object("[Ljava/lang/String;").component(),
            Some(Type::object(STRING))
        );
        assert_eq!(Type::object(STRING).component(), None);
        assert_eq!(
            Type::object(STRING).to_array(),
            Some(Type::object("[Ljava/lang/String;"))
        );
        assert_eq!(Type::Char.to_array(), Some(Type::object("[C")));
        assert_eq!(Type::Top.to_array(), None);
    }
}
