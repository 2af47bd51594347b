/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
pub mod class_loader;
pub mod klass;
pub mod library;
pub mod options;
pub mod ref_ptr;
pub mod value;
pub mod vm;
pub mod vm_classes;
