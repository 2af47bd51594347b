/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
//! Names of classes the runtime and the archiver know about.
use super::{
    class_loader::ClassDefinition,
    klass::{BasicType, FieldType},
    value::Value,
};

pub const OBJECT: &str = "base/lang/Object";
pub const CLASS: &str = "base/lang/Class";
pub const STRING: &str = "base/lang/String";
pub const OBJECT_ARRAY: &str = "[Lbase/lang/Object;";
pub const CHAR_ARRAY: &str = "[C";
pub const METHOD_TYPE: &str = "base/invoke/MethodType";

pub fn box_class_name(bt: BasicType) -> &'static str {
    match bt {
        BasicType::Boolean => "base/lang/Boolean",
        BasicType::Char => "base/lang/Character",
        BasicType::Float => "base/lang/Float",
        BasicType::Double => "base/lang/Double",
        BasicType::Byte => "base/lang/Byte",
        BasicType::Short => "base/lang/Short",
        BasicType::Int => "base/lang/Integer",
        BasicType::Long => "base/lang/Long",
        BasicType::Void => "base/lang/Void",
    }
}

fn primitive_size(bt: BasicType) -> i64 {
    match bt {
        BasicType::Boolean | BasicType::Byte => 1,
        BasicType::Char | BasicType::Short => 2,
        BasicType::Int | BasicType::Float => 4,
        BasicType::Long | BasicType::Double => 8,
        BasicType::Void => 0,
    }
}

/// Classes loaded during bootstrap, in load order.
pub fn bootstrap_classes() -> Vec<&'static str> {
    let mut names = vec![OBJECT, CLASS, STRING];
    names.extend(BasicType::ALL.iter().map(|bt| box_class_name(*bt)));
    names.push(OBJECT_ARRAY);
    names.push(CHAR_ARRAY);
    names
}

pub fn bootstrap_definitions() -> Vec<ClassDefinition> {
    let mut definitions = vec![
        ClassDefinition::new(OBJECT),
        ClassDefinition::new(CLASS),
        // value, hash
        ClassDefinition::new(STRING).instance_fields(2),
    ];
    for bt in BasicType::ALL.iter().copied() {
        let definition = ClassDefinition::new(box_class_name(bt));
        let definition = if bt == BasicType::Void {
            definition.reference_static("TYPE")
        } else {
            definition
                .instance_fields(1)
                .reference_static("TYPE")
                .static_field("BYTES", FieldType::Primitive(BasicType::Int))
        };
        definitions.push(definition.initializer(move |rt, klass| {
            let mirror = rt.primitive_mirror(bt);
            rt.set_static_field(klass, "TYPE", mirror.into())?;
            if bt != BasicType::Void {
                rt.set_static_field(klass, "BYTES", Value::Int(primitive_size(bt)))?;
            }
            Ok(())
        }));
    }
    definitions
}
